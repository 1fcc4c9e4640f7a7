//! Typed replies.
//!
//! The engine hands over raw RESP frames; [`Reply::from_frame`] turns each
//! one into an immutable [`Reply`]. Decoding never fails and performs no
//! semantic checks. Operations that expect a particular shape use the
//! `into_*` extractors, which report a mismatch as [`Error::Protocol`].

use crate::error::{Error, Result};
use crate::protocol::Frame;
use std::fmt;

/// A decoded reply from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bulk string payload.
    String(String),
    /// Integer payload.
    Integer(i64),
    /// Ordered children, owned by this reply.
    Array(Vec<Reply>),
    /// Null bulk string or null array.
    Nil,
    /// Status line such as `OK` or `PONG`.
    Status(String),
    /// Error line sent by the server.
    Error(String),
}

impl Reply {
    /// Decode a wire frame. Arrays are decoded child by child, in order.
    ///
    /// Recursion follows the frame's nesting, which the parser caps at
    /// [`parser::MAX_DEPTH`](crate::protocol::parser::MAX_DEPTH).
    pub fn from_frame(frame: Frame) -> Reply {
        match frame {
            Frame::Simple(s) => Reply::Status(s),
            Frame::Error(msg) => Reply::Error(msg),
            Frame::Integer(n) => Reply::Integer(n),
            Frame::Bulk(Some(data)) => Reply::String(String::from_utf8_lossy(&data).into_owned()),
            Frame::Array(Some(children)) => {
                Reply::Array(children.into_iter().map(Reply::from_frame).collect())
            }
            Frame::Bulk(None) | Frame::Array(None) => Reply::Nil,
        }
    }

    /// Name of the variant, as used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::String(_) => "string",
            Reply::Integer(_) => "integer",
            Reply::Array(_) => "array",
            Reply::Nil => "nil",
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Succeeds for anything except an error reply.
    pub fn check(self) -> Result<()> {
        match self {
            Reply::Error(_) => Err(Error::protocol("non-error", self)),
            _ => Ok(()),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Reply::String(s) => Ok(s),
            other => Err(Error::protocol("string", other)),
        }
    }

    pub fn into_integer(self) -> Result<i64> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(Error::protocol("integer", other)),
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Array(children) => Ok(children),
            other => Err(Error::protocol("array", other)),
        }
    }

    /// An array whose children must all be strings.
    pub fn into_string_array(self) -> Result<Vec<String>> {
        self.into_array()?
            .into_iter()
            .map(Reply::into_string)
            .collect()
    }

    /// An array where non-string children (usually nil) become `None`.
    pub fn into_optional_strings(self) -> Result<Vec<Option<String>>> {
        Ok(self
            .into_array()?
            .into_iter()
            .map(|child| match child {
                Reply::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::String(s) => write!(f, "{s:?}"),
            Reply::Integer(n) => write!(f, "(integer) {n}"),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Status(s) => write!(f, "{s}"),
            Reply::Error(msg) => write!(f, "(error) {msg}"),
            Reply::Array(children) if children.is_empty() => write!(f, "(empty array)"),
            Reply::Array(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {child}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}
