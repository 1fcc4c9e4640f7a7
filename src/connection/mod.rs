//! Blocking-style connection on top of the callback-driven protocol context.
//!
//! Each call submits one command with a callback, parks the caller on the
//! receiving half of a oneshot channel and returns once the callback has
//! sent the reply. Other connections on the same scheduler keep making
//! progress while the caller is parked.
//!
//! ```text
//! Disconnected -> Connecting -> Ready <-> CommandInFlight
//!       ^                         |             |
//!       +------ close / peer hangup / error ----+
//! ```
//!
//! Only one command may be outstanding per connection. `issue` takes
//! `&mut self`, so a single owner cannot overlap calls; sharing a connection
//! across contexts needs an outer queue or lock.

mod commands;

pub use commands::Pivot;

use crate::bridge::EventBridge;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::protocol::{AsyncContext, EngineError, ReplyCallback};
use crate::reply::Reply;
use crate::runtime::{self, Scheduler};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Ready,
    CommandInFlight,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Disconnected => "disconnected",
            ConnState::Connecting => "connecting",
            ConnState::Ready => "ready",
            ConnState::CommandInFlight => "busy",
        };
        f.write_str(name)
    }
}

type ReplySender = oneshot::Sender<Result<Reply>>;

/// The caller parked on the in-flight command.
struct Waiter {
    seq: u64,
    reply: ReplySender,
}

/// State shared with the callbacks installed on the protocol context.
struct Shared {
    state: Cell<ConnState>,
    /// Overwritten per command, never queued.
    waiter: RefCell<Option<Waiter>>,
    next_seq: Cell<u64>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Cell::new(ConnState::Disconnected),
            waiter: RefCell::new(None),
            next_seq: Cell::new(0),
        }
    }

    /// Record the caller about to park and return its command's sequence
    /// number.
    fn park(&self, reply: ReplySender) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq.wrapping_add(1));
        self.waiter.replace(Some(Waiter { seq, reply }));
        seq
    }

    /// Hand `outcome` to the caller that issued command `seq` and leave the
    /// in-flight state.
    fn resume(&self, seq: u64, outcome: Result<Reply>) {
        let waiter = {
            let mut slot = self.waiter.borrow_mut();
            match slot.as_ref() {
                Some(waiter) if waiter.seq == seq => slot.take(),
                _ => None,
            }
        };
        let Some(waiter) = waiter else {
            trace!(seq, "Reply for a command nobody waits on");
            return;
        };
        if outcome.is_ok() && self.state.get() == ConnState::CommandInFlight {
            self.state.set(ConnState::Ready);
        }
        send(waiter.reply, outcome);
    }

    /// The context closed. A caller still parked on a command is resumed
    /// with a disconnect error.
    fn disconnected(&self, cause: &str) {
        let previous = self.state.replace(ConnState::Disconnected);
        if let Some(waiter) = self.waiter.take() {
            warn!(cause, "Connection dropped with a command in flight");
            send(waiter.reply, Err(Error::Disconnect(cause.to_string())));
        }
        if previous != ConnState::Disconnected {
            debug!(cause, from = %previous, "Connection is now disconnected");
        }
    }
}

fn send(reply: ReplySender, outcome: Result<Reply>) {
    if reply.is_closed() {
        trace!("Reply arrived for a caller that is gone");
        return;
    }
    let _ = reply.send(outcome);
}

/// A single connection to the store.
pub struct Connection {
    addr: String,
    scheduler: Rc<dyn Scheduler>,
    context: Option<Rc<RefCell<AsyncContext>>>,
    shared: Rc<Shared>,
}

impl Connection {
    /// Create an unconnected handle for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            addr: addr.into(),
            scheduler,
            context: None,
            shared: Rc::new(Shared::new()),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ConnState {
        self.shared.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnState::Ready
    }

    /// Open the connection, parking the caller until the connect completes.
    ///
    /// Failures that happen before the connect is underway are returned
    /// without suspending.
    pub fn connect(&mut self) -> Result<()> {
        if self.state() != ConnState::Disconnected {
            return Err(Error::Connection(format!(
                "connection to {} is already {}",
                self.addr,
                self.state()
            )));
        }

        let context = AsyncContext::connect(&self.addr).map_err(|e| {
            error!(addr = %self.addr, error = %e, "Connect failed");
            Error::Connection(e.to_string())
        })?;
        let context = Rc::new(RefCell::new(context));
        EventBridge::attach(&context, Rc::clone(&self.scheduler))
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (connected, outcome) = oneshot::channel();
        {
            let mut ctx = context.borrow_mut();

            let shared = Rc::downgrade(&self.shared);
            ctx.set_disconnect_callback(Box::new(move |cause| {
                let cause = cause.map_or_else(|| "closed".to_string(), EngineError::to_string);
                if let Some(shared) = shared.upgrade() {
                    shared.disconnected(&cause);
                }
            }));

            ctx.set_connect_callback(Box::new(move |result| {
                let _ = connected.send(result.map_err(|e| Error::Connection(e.to_string())));
            }));
        }

        self.shared.state.set(ConnState::Connecting);
        self.context = Some(context);

        let outcome = runtime::park(&*self.scheduler, outcome)
            .map_err(Error::from)
            .and_then(|outcome| {
                outcome.unwrap_or_else(|| Err(Error::Connection("connect abandoned".into())))
            });

        match outcome {
            Ok(()) => {
                self.shared.state.set(ConnState::Ready);
                info!(addr = %self.addr, "Connected");
                Ok(())
            }
            Err(e) => {
                error!(addr = %self.addr, error = %e, "Connect failed");
                self.close();
                Err(e)
            }
        }
    }

    /// Send `command` and park until its reply arrives.
    ///
    /// An error reply from the server is returned as `Ok(Reply::Error(..))`;
    /// use the typed helpers or [`Reply::check`] to treat it as a failure.
    pub fn issue(&mut self, command: &Command) -> Result<Reply> {
        debug_assert_ne!(
            self.state(),
            ConnState::CommandInFlight,
            "second command issued while one is outstanding"
        );
        let context = match (&self.context, self.state()) {
            (Some(context), ConnState::Ready) => Rc::clone(context),
            (_, state) => {
                return Err(Error::Disconnect(format!(
                    "cannot issue {} while {state}",
                    command.name()
                )))
            }
        };

        let (reply, outcome) = oneshot::channel();
        let seq = self.shared.park(reply);
        self.shared.state.set(ConnState::CommandInFlight);

        let shared = Rc::downgrade(&self.shared);
        let callback: ReplyCallback = Box::new(move |frame| {
            let outcome = frame
                .map(Reply::from_frame)
                .map_err(|cause| Error::Disconnect(cause.to_string()));
            if let Some(shared) = shared.upgrade() {
                shared.resume(seq, outcome);
            }
        });

        trace!(command = %command, seq, "Issuing command");
        let submitted = context.borrow_mut().command(&command.encode(), callback);
        if let Err(e) = submitted {
            let cause = e.to_string();
            self.shared.disconnected(&cause);
            return Err(Error::Disconnect(cause));
        }

        let outcome = match runtime::park(&*self.scheduler, outcome) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(addr = %self.addr, error = %e, "Scheduler failed while waiting for reply");
                self.close();
                return Err(e.into());
            }
        };

        let reply = outcome.unwrap_or_else(|| Err(Error::Disconnect("reply was lost".into())))?;
        trace!(command = command.name(), reply = reply.kind(), "Command complete");
        Ok(reply)
    }

    /// Tear down the protocol context. Any outstanding command fails with a
    /// disconnect error. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(context) = self.context.take() {
            match context.try_borrow_mut() {
                Ok(mut ctx) => ctx.disconnect(),
                Err(_) => warn!(addr = %self.addr, "Context busy during close"),
            }
        }
        self.shared.disconnected("closed by client");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}
