//! Client error types.

use crate::reply::Reply;
use thiserror::Error;

/// Result alias used by every client operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a [`Connection`](crate::Connection).
#[derive(Debug, Error)]
pub enum Error {
    /// The socket could not be created, resolved or connected.
    #[error("connection error: {0}")]
    Connection(String),

    /// The reply did not have the shape the operation expected.
    #[error("protocol error: expected {expected} reply, got {found}")]
    Protocol { expected: &'static str, found: Reply },

    /// A string reply could not be parsed into the requested number.
    #[error("data error: cannot parse {value:?} as {target}")]
    Data { value: String, target: &'static str },

    /// The connection went away before a reply arrived.
    #[error("disconnected: {0}")]
    Disconnect(String),

    /// The scheduler failed while waiting for readiness.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn protocol(expected: &'static str, found: Reply) -> Self {
        Error::Protocol { expected, found }
    }
}
