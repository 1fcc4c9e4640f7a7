//! Glue between the protocol context and the scheduler.
//!
//! The context asks for read/write interest through [`EventHooks`]; the
//! bridge turns those requests into scheduler registrations whose handlers
//! call back into `handle_read` / `handle_write`. Handlers only hold a weak
//! handle to the context, so a registration never keeps a closed context
//! alive.

use crate::protocol::{AsyncContext, EngineError, EventHooks};
use crate::runtime::{Direction, EventHandler, Scheduler};
use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Per-context bridging state, owned by the context it serves.
pub struct EventBridge {
    scheduler: Rc<dyn Scheduler>,
    fd: RawFd,
    context: Weak<RefCell<AsyncContext>>,
    reading: bool,
    writing: bool,
}

impl EventBridge {
    /// Attach a bridge to `context`. Fails if the context already has hooks.
    pub fn attach(
        context: &Rc<RefCell<AsyncContext>>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Result<(), EngineError> {
        let mut ctx = context.borrow_mut();
        let bridge = EventBridge::new(scheduler, ctx.fd(), Rc::downgrade(context));
        ctx.attach(Box::new(bridge))
    }

    pub(crate) fn new(
        scheduler: Rc<dyn Scheduler>,
        fd: RawFd,
        context: Weak<RefCell<AsyncContext>>,
    ) -> Self {
        Self {
            scheduler,
            fd,
            context,
            reading: false,
            writing: false,
        }
    }

    fn handler(&self, direction: Direction) -> EventHandler {
        let context = self.context.clone();
        Rc::new(move || {
            let Some(context) = context.upgrade() else {
                return;
            };
            let Ok(mut ctx) = context.try_borrow_mut() else {
                warn!(?direction, "Context busy, dropping readiness event");
                return;
            };
            match direction {
                Direction::Read => ctx.handle_read(),
                Direction::Write => ctx.handle_write(),
            }
        })
    }

    fn flag(&mut self, direction: Direction) -> &mut bool {
        match direction {
            Direction::Read => &mut self.reading,
            Direction::Write => &mut self.writing,
        }
    }

    /// Adding always re-registers, which re-arms edge-triggered readiness.
    fn watch(&mut self, direction: Direction) -> io::Result<()> {
        let handler = self.handler(direction);
        self.scheduler
            .register_event(self.fd, direction, handler)
            .inspect_err(|e| {
                warn!(fd = self.fd, ?direction, error = %e, "Failed to register interest")
            })?;
        *self.flag(direction) = true;
        Ok(())
    }

    fn unwatch(&mut self, direction: Direction) -> io::Result<()> {
        if !*self.flag(direction) {
            return Ok(());
        }
        self.scheduler.unregister_event(self.fd, direction)?;
        *self.flag(direction) = false;
        Ok(())
    }
}

impl EventHooks for EventBridge {
    fn add_read(&mut self) -> io::Result<()> {
        self.watch(Direction::Read)
    }

    fn del_read(&mut self) -> io::Result<()> {
        self.unwatch(Direction::Read)
    }

    fn add_write(&mut self) -> io::Result<()> {
        self.watch(Direction::Write)
    }

    fn del_write(&mut self) -> io::Result<()> {
        self.unwatch(Direction::Write)
    }

    fn cleanup(&mut self) {
        for direction in [Direction::Read, Direction::Write] {
            if let Err(e) = self.unwatch(direction) {
                warn!(fd = self.fd, ?direction, error = %e, "Failed to unregister interest");
                *self.flag(direction) = false;
            }
        }
        self.context = Weak::new();
        trace!(fd = self.fd, "Bridge released");
    }
}
