//! Cooperative scheduling over readiness events.
//!
//! Everything runs on one thread. A caller that needs to wait hands the
//! scheduler a predicate and [`Scheduler::yield_until`] keeps dispatching
//! readiness handlers, possibly for other connections, until the predicate
//! holds. Handlers resume a waiter by sending on its oneshot channel; see
//! [`park`].
//!
//! - `IoManager`: the `mio` implementation (epoll on Linux, kqueue on macOS)

mod io_manager;

pub use io_manager::{IoManager, DEFAULT_EVENTS_CAPACITY};

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Readiness direction a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Callback invoked when a descriptor becomes ready.
pub type EventHandler = Rc<dyn Fn()>;

/// The scheduler primitives the event bridge and connections rely on.
pub trait Scheduler {
    /// Watch `fd` for `direction` and run `handler` on readiness.
    ///
    /// Registering a direction that is already watched replaces the handler
    /// and re-arms the registration. On error the previous registration is
    /// left as it was.
    fn register_event(&self, fd: RawFd, direction: Direction, handler: EventHandler)
        -> io::Result<()>;

    /// Stop watching `fd` for `direction`. Unknown registrations are ignored.
    fn unregister_event(&self, fd: RawFd, direction: Direction) -> io::Result<()>;

    /// Suspend the caller, dispatching events until `ready` returns true.
    fn yield_until(&self, ready: &dyn Fn() -> bool) -> io::Result<()>;
}

/// Park the caller until `receiver` resolves, running other handlers
/// meanwhile.
///
/// Returns `Ok(None)` if the sender was dropped without a value.
pub fn park<T>(scheduler: &dyn Scheduler, receiver: oneshot::Receiver<T>) -> io::Result<Option<T>> {
    let receiver = RefCell::new(receiver);
    let outcome = RefCell::new(None);

    scheduler.yield_until(&|| {
        if outcome.borrow().is_some() {
            return true;
        }
        let resolved = match receiver.borrow_mut().try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Closed) => None,
        };
        *outcome.borrow_mut() = Some(resolved);
        true
    })?;

    Ok(outcome.into_inner().flatten())
}
