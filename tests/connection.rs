use std::cell::Cell;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kvbridge::{
    Command, ConnState, Connection, Direction, Error, EventHandler, IoManager, Pivot, Reply,
    Scheduler,
};

/// What the fake server saw on one connection.
struct Transcript {
    commands: Vec<Vec<String>>,
    /// Commands that arrived while an earlier one was still unanswered.
    overlapped: usize,
}

/// Accept one connection and answer each command with `respond`.
/// Returning `None` hangs up without replying.
fn serve<F>(mut respond: F) -> (String, JoinHandle<Transcript>)
where
    F: FnMut(&[String]) -> Option<Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut writer = stream.try_clone().expect("clone");
        let mut reader = BufReader::new(stream);
        let mut transcript = Transcript {
            commands: Vec::new(),
            overlapped: 0,
        };

        while let Ok(Some(args)) = read_command(&mut reader) {
            // Give a misbehaving client time to send a second command.
            thread::sleep(Duration::from_millis(10));
            if !reader.buffer().is_empty() || has_pending_bytes(reader.get_ref()) {
                transcript.overlapped += 1;
            }

            let reply = respond(&args);
            transcript.commands.push(args);
            match reply {
                Some(bytes) => writer.write_all(&bytes).expect("write reply"),
                None => break,
            }
        }
        transcript
    });

    (addr, handle)
}

fn has_pending_bytes(stream: &TcpStream) -> bool {
    stream.set_nonblocking(true).unwrap();
    let pending = matches!(stream.peek(&mut [0u8; 1]), Ok(n) if n > 0);
    stream.set_nonblocking(false).unwrap();
    pending
}

fn read_command(reader: &mut BufReader<TcpStream>) -> io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let count: usize = header(&line, '*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line)?;
        let len: usize = header(&line, '$')?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(String::from_utf8(data).expect("utf8 argument"));
    }
    Ok(Some(args))
}

fn header(line: &str, prefix: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad header {line:?}")))
}

fn connect(addr: &str) -> Connection {
    let scheduler = Rc::new(IoManager::new(64).expect("scheduler"));
    let mut conn = Connection::new(addr, scheduler);
    conn.connect().expect("connect");
    conn
}

fn reply(bytes: &[u8]) -> Option<Vec<u8>> {
    Some(bytes.to_vec())
}

/// `IoManager` whose next write registration can be made to fail.
struct FailingWrites {
    inner: IoManager,
    armed: Cell<bool>,
}

impl Scheduler for FailingWrites {
    fn register_event(
        &self,
        fd: RawFd,
        direction: Direction,
        handler: EventHandler,
    ) -> io::Result<()> {
        if direction == Direction::Write && self.armed.replace(false) {
            return Err(io::Error::from(io::ErrorKind::OutOfMemory));
        }
        self.inner.register_event(fd, direction, handler)
    }

    fn unregister_event(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        self.inner.unregister_event(fd, direction)
    }

    fn yield_until(&self, ready: &dyn Fn() -> bool) -> io::Result<()> {
        self.inner.yield_until(ready)
    }
}

#[test]
fn get_missing_key_is_a_failure() {
    let (addr, server) = serve(|_| reply(b"$-1\r\n"));
    let mut conn = connect(&addr);

    let err = conn.get("missing").unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol {
            expected: "string",
            found: Reply::Nil
        }
    ));
    assert_eq!(conn.state(), ConnState::Ready);

    conn.close();
    let transcript = server.join().unwrap();
    assert_eq!(transcript.commands, vec![vec!["GET", "missing"]]);
}

#[test]
fn incr_returns_integer_reply() {
    let (addr, server) = serve(|_| reply(b":5\r\n"));
    let mut conn = connect(&addr);

    assert_eq!(conn.incr("counter").unwrap(), 5);

    conn.close();
    assert_eq!(server.join().unwrap().commands, vec![vec!["INCR", "counter"]]);
}

#[test]
fn blocking_pop_returns_only_the_value() {
    let (addr, server) = serve(|args| match args[1].as_str() {
        "jobs" => reply(b"*2\r\n$4\r\njobs\r\n$6\r\nbuild1\r\n"),
        "short" => reply(b"*1\r\n$5\r\nshort\r\n"),
        _ => reply(b"*-1\r\n"),
    });
    let mut conn = connect(&addr);

    assert_eq!(conn.blpop("jobs", 1).unwrap(), "build1");
    assert!(matches!(conn.brpop("short", 1), Err(Error::Protocol { .. })));
    assert!(conn.blpop("empty", 0).is_err());
    assert_eq!(conn.state(), ConnState::Ready);

    conn.close();
    let transcript = server.join().unwrap();
    assert_eq!(transcript.commands[0], vec!["BLPOP", "jobs", "1"]);
    assert_eq!(transcript.commands[1], vec!["BRPOP", "short", "1"]);
}

#[test]
fn disconnect_with_command_in_flight_resumes_caller() {
    let (addr, server) = serve(|_| None);
    let mut conn = connect(&addr);

    match conn.get("key") {
        Err(Error::Disconnect(cause)) => assert!(cause.contains("closed by peer"), "{cause}"),
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(conn.state(), ConnState::Disconnected);

    // Nothing more can be issued once the peer is gone.
    assert!(matches!(conn.ping(), Err(Error::Disconnect(_))));
    server.join().unwrap();
}

#[test]
fn helpers_never_overlap_commands() {
    let (addr, server) = serve(|args| match args[0].as_str() {
        "SET" => reply(b"+OK\r\n"),
        "GET" => reply(b"$2\r\n41\r\n"),
        "INCR" => reply(b":42\r\n"),
        "LRANGE" => reply(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n"),
        "MGET" => reply(b"*2\r\n$1\r\nx\r\n$-1\r\n"),
        _ => reply(b"-ERR unknown command\r\n"),
    });
    let mut conn = connect(&addr);

    conn.set("n", "41").unwrap();
    assert_eq!(conn.state(), ConnState::Ready);
    assert_eq!(conn.get_int("n").unwrap(), 41);
    assert_eq!(conn.incr("n").unwrap(), 42);
    assert_eq!(conn.lrange("l", 0, -1).unwrap(), vec!["a", "b"]);
    assert_eq!(
        conn.mget(&["x", "y"]).unwrap(),
        vec![Some("x".to_string()), None]
    );
    assert_eq!(conn.state(), ConnState::Ready);

    conn.close();
    let transcript = server.join().unwrap();
    assert_eq!(transcript.commands.len(), 5);
    assert_eq!(transcript.overlapped, 0);
}

#[test]
fn error_reply_is_returned_by_issue_and_fails_helpers() {
    let (addr, server) = serve(|_| reply(b"-WRONGTYPE Operation against a key\r\n"));
    let mut conn = connect(&addr);

    let raw = conn.issue(&Command::new("LPUSH").arg("k").arg("v")).unwrap();
    assert!(raw.is_error());

    let err = conn.set("k", "v").unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol {
            found: Reply::Error(_),
            ..
        }
    ));

    conn.close();
    server.join().unwrap();
}

#[test]
fn non_numeric_value_is_a_data_error() {
    let (addr, server) = serve(|_| reply(b"$3\r\nabc\r\n"));
    let mut conn = connect(&addr);

    assert!(matches!(
        conn.get_int("k"),
        Err(Error::Data {
            target: "integer",
            ..
        })
    ));
    assert!(matches!(conn.zscore("z", "m"), Err(Error::Data { .. })));

    conn.close();
    server.join().unwrap();
}

#[test]
fn arguments_with_spaces_survive_encoding() {
    let (addr, server) = serve(|_| reply(b"+OK\r\n"));
    let mut conn = connect(&addr);

    conn.set("greeting", "hello there\r\nworld").unwrap();

    conn.close();
    let transcript = server.join().unwrap();
    assert_eq!(
        transcript.commands,
        vec![vec!["SET", "greeting", "hello there\r\nworld"]]
    );
}

#[test]
fn refused_connect_reports_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let scheduler = Rc::new(IoManager::new(16).unwrap());
    let mut conn = Connection::new(addr, scheduler.clone());
    assert!(matches!(conn.connect(), Err(Error::Connection(_))));
    assert_eq!(conn.state(), ConnState::Disconnected);
    assert_eq!(scheduler.registered(), 0);
}

#[test]
fn connections_share_one_scheduler() {
    let (addr_a, server_a) = serve(|_| reply(b"+PONG\r\n"));
    let (addr_b, server_b) = serve(|_| reply(b":7\r\n"));

    let scheduler = Rc::new(IoManager::new(64).unwrap());
    let mut a = Connection::new(addr_a, scheduler.clone());
    let mut b = Connection::new(addr_b, scheduler.clone());
    a.connect().unwrap();
    b.connect().unwrap();
    assert!(matches!(a.connect(), Err(Error::Connection(_))));

    a.ping().unwrap();
    assert_eq!(b.llen("list").unwrap(), 7);
    a.ping().unwrap();

    a.close();
    b.close();
    a.close();
    assert_eq!(scheduler.registered(), 0);
    assert!(matches!(
        b.issue(&Command::new("PING")),
        Err(Error::Disconnect(_))
    ));

    assert_eq!(server_a.join().unwrap().commands.len(), 2);
    assert_eq!(server_b.join().unwrap().commands.len(), 1);
}

#[test]
fn scheduler_trait_object_drives_connection() {
    let (addr, server) = serve(|_| reply(b"*2\r\n$1\r\nf\r\n$1\r\nv\r\n"));
    let scheduler: Rc<dyn Scheduler> = Rc::new(IoManager::new(8).unwrap());
    let mut conn = Connection::new(addr, scheduler);
    conn.connect().unwrap();

    assert_eq!(
        conn.hgetall("h").unwrap(),
        vec![("f".to_string(), "v".to_string())]
    );

    drop(conn);
    server.join().unwrap();
}

#[test]
fn malformed_reply_closes_connection_with_cause() {
    let (addr, server) = serve(|_| reply(b"?garbage\r\n"));
    let mut conn = connect(&addr);

    match conn.ping() {
        Err(Error::Disconnect(cause)) => assert!(cause.contains("malformed"), "{cause}"),
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(conn.state(), ConnState::Disconnected);
    server.join().unwrap();
}

#[test]
fn refused_interest_registration_fails_the_waiting_call() {
    let (addr_a, server_a) = serve(|_| reply(b"+PONG\r\n"));
    let (addr_b, server_b) = serve(|_| reply(b"+PONG\r\n"));

    let scheduler = Rc::new(FailingWrites {
        inner: IoManager::new(16).unwrap(),
        armed: Cell::new(false),
    });
    let mut a = Connection::new(addr_a, scheduler.clone());
    let mut b = Connection::new(addr_b, scheduler.clone());
    a.connect().unwrap();
    b.connect().unwrap();
    assert_eq!(
        b.issue(&Command::new("PING")).unwrap(),
        Reply::Status("PONG".into())
    );

    // `a` stays registered, so a stuck caller would never be woken up.
    scheduler.armed.set(true);
    assert!(matches!(
        b.issue(&Command::new("PING")),
        Err(Error::Disconnect(_))
    ));
    assert_eq!(b.state(), ConnState::Disconnected);

    a.ping().unwrap();
    a.close();
    assert_eq!(server_a.join().unwrap().commands.len(), 1);
    assert_eq!(server_b.join().unwrap().commands.len(), 1);
}

#[test]
fn list_set_and_sorted_set_helpers_send_their_arguments() {
    let (addr, server) = serve(|args| match args[0].as_str() {
        "LINSERT" => reply(b":3\r\n"),
        "RPOPLPUSH" => reply(b"$1\r\nz\r\n"),
        "LSET" => reply(b"+OK\r\n"),
        "SINTER" => reply(b"*1\r\n$1\r\nm\r\n"),
        "ZREMRANGEBYRANK" => reply(b":2\r\n"),
        _ => reply(b"-ERR unexpected\r\n"),
    });
    let mut conn = connect(&addr);

    assert_eq!(conn.linsert("l", Pivot::Before, "b", "a").unwrap(), 3);
    assert_eq!(conn.rpoplpush("src", "dst").unwrap(), "z");
    conn.lset("l", -1, "y").unwrap();
    assert_eq!(conn.sinter("s1", "s2").unwrap(), vec!["m"]);
    assert_eq!(conn.zrem_range_by_rank("z", 0, 1).unwrap(), 2);

    conn.close();
    assert_eq!(
        server.join().unwrap().commands,
        vec![
            vec!["LINSERT", "l", "BEFORE", "b", "a"],
            vec!["RPOPLPUSH", "src", "dst"],
            vec!["LSET", "l", "-1", "y"],
            vec!["SINTER", "s1", "s2"],
            vec!["ZREMRANGEBYRANK", "z", "0", "1"],
        ]
    );
}
