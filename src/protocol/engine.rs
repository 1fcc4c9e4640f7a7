//! Non-blocking, callback-driven protocol context.
//!
//! `AsyncContext` owns the socket and never waits. Whoever drives it must
//! call [`AsyncContext::handle_read`] and [`AsyncContext::handle_write`] when
//! the socket is ready; the context says when it wants those calls through
//! its [`EventHooks`]. Every submitted command carries a callback, and the
//! callbacks are completed strictly in submission order.
//!
//! Lifecycle:
//!
//! ```text
//! connect() -> Connecting --writable, no error--> Connected
//!                  |                                  |
//!                  +------ error / disconnect() ------+--> Closed
//! ```
//!
//! On the way to `Closed` every queued reply callback receives the cause,
//! the disconnect callback fires (only if the context had connected),
//! interest is dropped and the hooks' `cleanup` runs. A hook that fails to
//! change interest closes the context the same way, so no callback is ever
//! left waiting on readiness that will not come.

use super::parser::{self, Frame, ParseResult};
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Read chunk size
const READ_CHUNK: usize = 16 * 1024;

/// Errors raised by the protocol context.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed reply: {0}")]
    Protocol(String),

    #[error("connection closed by peer")]
    Eof,

    #[error("context is closed")]
    Closed,

    #[error("event hooks already attached")]
    AlreadyAttached,
}

/// Interest toggles requested by the context, plus teardown.
pub trait EventHooks {
    fn add_read(&mut self) -> io::Result<()>;
    fn del_read(&mut self) -> io::Result<()>;
    fn add_write(&mut self) -> io::Result<()>;
    fn del_write(&mut self) -> io::Result<()>;
    /// The context is going away; release everything tied to it.
    fn cleanup(&mut self);
}

/// Completion for one command. `Err` carries the reason the context closed
/// before the reply arrived.
pub type ReplyCallback = Box<dyn FnOnce(Result<Frame, &EngineError>)>;
/// Outcome of the connect attempt.
pub type ConnectCallback = Box<dyn FnOnce(Result<(), &EngineError>)>;
/// Fired once when a connected context closes; `None` for a local close.
pub type DisconnectCallback = Box<dyn FnOnce(Option<&EngineError>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Connected,
    Closed,
}

/// One socket-level protocol context.
pub struct AsyncContext {
    stream: TcpStream,
    peer: SocketAddr,
    state: State,
    obuf: BytesMut,
    ibuf: BytesMut,
    callbacks: VecDeque<ReplyCallback>,
    hooks: Option<Box<dyn EventHooks>>,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

impl AsyncContext {
    /// Start a non-blocking connect to `addr` (`host:port`).
    ///
    /// Resolution and socket errors, and connects refused on the spot, are
    /// returned here. Otherwise the context is `Connecting` and the outcome
    /// arrives through the connect callback.
    pub fn connect(addr: &str) -> Result<Self, EngineError> {
        let peer = addr
            .to_socket_addrs()
            .map_err(|e| EngineError::Resolve {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| EngineError::Resolve {
                addr: addr.to_string(),
                reason: "no addresses".to_string(),
            })?;

        let stream = TcpStream::from_std(start_connect(peer)?);
        debug!(peer = %peer, fd = stream.as_raw_fd(), "Connecting");

        Ok(Self {
            stream,
            peer,
            state: State::Connecting,
            obuf: BytesMut::new(),
            ibuf: BytesMut::with_capacity(READ_CHUNK),
            callbacks: VecDeque::new(),
            hooks: None,
            on_connect: None,
            on_disconnect: None,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Number of commands waiting for a reply.
    pub fn pending(&self) -> usize {
        self.callbacks.len()
    }

    /// Install the event hooks. Only one set may be attached.
    pub fn attach(&mut self, hooks: Box<dyn EventHooks>) -> Result<(), EngineError> {
        if self.hooks.is_some() {
            return Err(EngineError::AlreadyAttached);
        }
        self.hooks = Some(hooks);
        Ok(())
    }

    /// Install the connect callback and start watching for connect completion.
    pub fn set_connect_callback(&mut self, callback: ConnectCallback) {
        self.on_connect = Some(callback);
        if self.state == State::Connecting {
            self.toggle(|h| h.add_write());
        }
    }

    pub fn set_disconnect_callback(&mut self, callback: DisconnectCallback) {
        self.on_disconnect = Some(callback);
    }

    /// Queue an encoded request; `callback` runs once its reply is parsed.
    ///
    /// Only a closed context refuses the request. Once queued, `callback`
    /// always runs, with an error if the context closes first.
    pub fn command(&mut self, request: &[u8], callback: ReplyCallback) -> Result<(), EngineError> {
        if self.state == State::Closed {
            return Err(EngineError::Closed);
        }
        self.obuf.extend_from_slice(request);
        self.callbacks.push_back(callback);
        trace!(bytes = request.len(), pending = self.callbacks.len(), "Queued command");
        self.toggle(|h| h.add_write());
        Ok(())
    }

    /// Socket is readable: read everything available and complete callbacks.
    pub fn handle_read(&mut self) {
        if !self.ensure_connected() {
            return;
        }

        let mut chunk = [0u8; READ_CHUNK];
        let eof = loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break true,
                Ok(n) => self.ibuf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.teardown(Some(e.into()));
                    return;
                }
            }
        };

        self.dispatch_replies();
        if eof {
            self.teardown(Some(EngineError::Eof));
        }
    }

    /// Socket is writable: finish connecting, then flush queued requests.
    pub fn handle_write(&mut self) {
        if !self.ensure_connected() {
            return;
        }

        while !self.obuf.is_empty() {
            match self.stream.write(&self.obuf) {
                Ok(0) => {
                    self.teardown(Some(io::Error::from(io::ErrorKind::WriteZero).into()));
                    return;
                }
                Ok(n) => self.obuf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.teardown(Some(e.into()));
                    return;
                }
            }
        }

        self.toggle(|h| h.del_write());
    }

    /// Close the context from our side.
    pub fn disconnect(&mut self) {
        self.teardown(None);
    }

    /// Change interest through the hooks. A failure closes the context and
    /// returns false.
    fn toggle(&mut self, f: impl FnOnce(&mut dyn EventHooks) -> io::Result<()>) -> bool {
        let result = match self.hooks.as_mut() {
            Some(hooks) => f(hooks.as_mut()),
            None => Ok(()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Interest change failed");
                self.teardown(Some(e.into()));
                false
            }
        }
    }

    /// Returns true once the context is connected, completing a pending
    /// connect on the way.
    fn ensure_connected(&mut self) -> bool {
        match self.state {
            State::Connected => return true,
            State::Closed => return false,
            State::Connecting => {}
        }

        let progress = match self.stream.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => match self.stream.peer_addr() {
                Ok(_) => Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
                Err(e) => Err(e),
            },
        };

        match progress {
            Ok(false) => false,
            Ok(true) => {
                self.state = State::Connected;
                debug!(peer = %self.peer, "Connected");
                if let Some(callback) = self.on_connect.take() {
                    callback(Ok(()));
                }
                if !self.toggle(|h| h.add_read()) {
                    return false;
                }
                // Requests queued while connecting still need flushing.
                !self.obuf.is_empty() || self.toggle(|h| h.del_write())
            }
            Err(e) => {
                self.teardown(Some(e.into()));
                false
            }
        }
    }

    fn dispatch_replies(&mut self) {
        while self.state == State::Connected {
            match parser::parse(&self.ibuf) {
                ParseResult::Complete(frame, consumed) => {
                    self.ibuf.advance(consumed);
                    trace!(kind = frame.kind(), "Parsed reply");
                    match self.callbacks.pop_front() {
                        Some(callback) => callback(Ok(frame)),
                        None => warn!(kind = frame.kind(), "Reply with no pending command"),
                    }
                }
                ParseResult::Incomplete => break,
                ParseResult::Error(msg) => {
                    self.teardown(Some(EngineError::Protocol(msg)));
                    break;
                }
            }
        }
    }

    fn teardown(&mut self, cause: Option<EngineError>) {
        if self.state == State::Closed {
            return;
        }
        let was_connected = self.state == State::Connected;
        self.state = State::Closed;

        match &cause {
            Some(e) => debug!(peer = %self.peer, error = %e, "Closing context"),
            None => debug!(peer = %self.peer, "Closing context"),
        }

        let closed = EngineError::Closed;
        let reason = cause.as_ref().unwrap_or(&closed);

        if let Some(callback) = self.on_connect.take() {
            callback(Err(reason));
        }

        let pending: Vec<ReplyCallback> = self.callbacks.drain(..).collect();
        for callback in pending {
            callback(Err(reason));
        }

        if was_connected {
            if let Some(callback) = self.on_disconnect.take() {
                callback(cause.as_ref());
            }
        }

        self.obuf.clear();
        self.ibuf.clear();
        if let Some(mut hooks) = self.hooks.take() {
            let read = hooks.del_read();
            let write = hooks.del_write();
            if let Err(e) = read.and(write) {
                debug!(peer = %self.peer, error = %e, "Dropping interest failed");
            }
            hooks.cleanup();
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for AsyncContext {
    fn drop(&mut self) {
        self.teardown(None);
    }
}

/// Create a non-blocking TCP socket and begin connecting it.
fn start_connect(addr: SocketAddr) -> io::Result<std::net::TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;

    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }

    Ok(socket.into())
}
