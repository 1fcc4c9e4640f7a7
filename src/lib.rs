//! kvbridge: a blocking-style Redis client on a cooperative scheduler.
//!
//! The client is built from a callback-driven protocol context that never
//! blocks, a `mio` readiness scheduler, and a bridge between the two. A
//! [`Connection`] submits one command at a time and parks the caller until
//! the reply callback fires, so calling code reads like ordinary blocking
//! code while other connections on the same scheduler keep running.
//!
//! Components:
//! - `reply`: typed replies decoded from wire frames
//! - `command`: request encoding
//! - `protocol`: RESP parsing and the non-blocking protocol context
//! - `runtime`: the scheduler trait, `IoManager` and `park`
//! - `bridge`: interest toggles to scheduler registrations
//! - `connection`: the blocking API and typed command helpers
//!
//! ```no_run
//! use kvbridge::{Connection, IoManager};
//! use std::rc::Rc;
//!
//! let scheduler = Rc::new(IoManager::new(256)?);
//! let mut conn = Connection::new("127.0.0.1:6379", scheduler);
//! conn.connect()?;
//! conn.set("greeting", "hello")?;
//! assert_eq!(conn.get("greeting")?, "hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod command;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod reply;
pub mod runtime;

pub use command::Command;
pub use connection::{ConnState, Connection, Pivot};
pub use error::{Error, Result};
pub use reply::Reply;
pub use runtime::{park, Direction, EventHandler, IoManager, Scheduler};
