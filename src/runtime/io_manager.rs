//! mio-backed scheduler.
//!
//! Readiness-based model: poll tells us when descriptors are ready and the
//! registered handler for that direction runs. Each descriptor owns one slab
//! slot whose index is the mio token; read and write handlers share it and
//! the mio interest is recomputed whenever either side changes.

use super::{Direction, EventHandler, Scheduler};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Default number of events fetched per poll.
pub const DEFAULT_EVENTS_CAPACITY: usize = 256;

/// Handlers registered for one descriptor.
struct Registration {
    fd: RawFd,
    read: Option<EventHandler>,
    write: Option<EventHandler>,
}

impl Registration {
    fn interest(&self) -> Option<Interest> {
        match (self.read.is_some(), self.write.is_some()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<EventHandler> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }
}

/// Single-threaded cooperative scheduler over a mio `Poll`.
pub struct IoManager {
    poll: RefCell<Poll>,
    registry: Registry,
    events: RefCell<Events>,
    registrations: RefCell<Slab<Registration>>,
    tokens: RefCell<HashMap<RawFd, usize>>,
}

impl IoManager {
    /// Create a scheduler fetching up to `events_capacity` events per poll.
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll: RefCell::new(poll),
            registry,
            events: RefCell::new(Events::with_capacity(events_capacity.max(1))),
            registrations: RefCell::new(Slab::new()),
            tokens: RefCell::new(HashMap::new()),
        })
    }

    /// Number of descriptors currently watched.
    pub fn registered(&self) -> usize {
        self.registrations.borrow().len()
    }

    /// Poll once and run the handlers of every ready descriptor.
    ///
    /// Returns the number of handlers that ran.
    pub fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let ready: Vec<(Token, bool, bool)> = {
            let mut events = self.events.borrow_mut();
            match self.poll.borrow_mut().poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
                Err(e) => return Err(e),
            }
            events
                .iter()
                .map(|event| {
                    // Errors and hangups wake both sides so the engine can see them.
                    let failed = event.is_error();
                    (
                        event.token(),
                        event.is_readable() || event.is_read_closed() || failed,
                        event.is_writable() || event.is_write_closed() || failed,
                    )
                })
                .collect()
        };

        let mut ran = 0;
        for (token, readable, writable) in ready {
            // Handlers may register or unregister, so never hold the slab borrow
            // while one runs.
            if readable {
                if let Some(handler) = self.handler(token, Direction::Read) {
                    handler();
                    ran += 1;
                }
            }
            if writable {
                if let Some(handler) = self.handler(token, Direction::Write) {
                    handler();
                    ran += 1;
                }
            }
        }
        Ok(ran)
    }

    fn handler(&self, token: Token, direction: Direction) -> Option<EventHandler> {
        let mut registrations = self.registrations.borrow_mut();
        registrations.get_mut(token.0)?.slot(direction).clone()
    }
}

impl Scheduler for IoManager {
    fn register_event(
        &self,
        fd: RawFd,
        direction: Direction,
        handler: EventHandler,
    ) -> io::Result<()> {
        let mut registrations = self.registrations.borrow_mut();
        let mut tokens = self.tokens.borrow_mut();

        match tokens.get(&fd).copied() {
            Some(key) => {
                let registration = &mut registrations[key];
                let previous = registration.slot(direction).replace(handler);
                if let Some(interest) = registration.interest() {
                    if let Err(e) = self
                        .registry
                        .reregister(&mut SourceFd(&fd), Token(key), interest)
                    {
                        *registration.slot(direction) = previous;
                        return Err(e);
                    }
                }
            }
            None => {
                let entry = registrations.vacant_entry();
                let key = entry.key();
                let mut registration = Registration {
                    fd,
                    read: None,
                    write: None,
                };
                *registration.slot(direction) = Some(handler);
                if let Some(interest) = registration.interest() {
                    self.registry
                        .register(&mut SourceFd(&fd), Token(key), interest)?;
                }
                entry.insert(registration);
                tokens.insert(fd, key);
            }
        }

        trace!(fd, ?direction, "Registered event");
        Ok(())
    }

    fn unregister_event(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        let mut registrations = self.registrations.borrow_mut();
        let mut tokens = self.tokens.borrow_mut();

        let Some(key) = tokens.get(&fd).copied() else {
            return Ok(());
        };

        let registration = &mut registrations[key];
        let Some(handler) = registration.slot(direction).take() else {
            return Ok(());
        };

        match registration.interest() {
            Some(interest) => {
                if let Err(e) = self
                    .registry
                    .reregister(&mut SourceFd(&fd), Token(key), interest)
                {
                    *registration.slot(direction) = Some(handler);
                    return Err(e);
                }
            }
            None => {
                let registration = registrations.remove(key);
                tokens.remove(&fd);
                // The descriptor may already be closed, in which case the
                // kernel dropped it from the poll set on its own.
                if let Err(e) = self.registry.deregister(&mut SourceFd(&registration.fd)) {
                    debug!(fd, error = %e, "Deregister failed");
                }
            }
        }

        trace!(fd, ?direction, "Unregistered event");
        Ok(())
    }

    fn yield_until(&self, ready: &dyn Fn() -> bool) -> io::Result<()> {
        while !ready() {
            if self.registered() == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no registered events left to resume the waiting caller",
                ));
            }
            self.turn(None)?;
        }
        Ok(())
    }
}
