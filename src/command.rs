//! Request encoding.
//!
//! A [`Command`] is a keyword plus ordered arguments. On the wire it is sent
//! as a RESP array of bulk strings, so arguments may contain spaces, quotes
//! or CRLF. `Display` renders the space-delimited form for logs.

use crate::protocol::Frame;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// A command keyword with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument. Anything displayable works: keys, numbers, scores.
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(Bytes::from(arg.to_string()));
        self
    }

    /// Append one raw argument without text conversion.
    pub fn arg_bytes(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Build a command from already split words, first word is the keyword.
    pub fn from_words<I, S>(words: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words = words.into_iter().map(Into::into);
        let name = words.next()?;
        Some(words.fold(Command::new(name), |cmd, word| cmd.arg_bytes(word)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Encode as a RESP multi-bulk request.
    pub fn encode(&self) -> BytesMut {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(Frame::Bulk(Some(Bytes::from(self.name.clone()))));
        parts.extend(self.args.iter().cloned().map(|arg| Frame::Bulk(Some(arg))));
        Frame::Array(Some(parts)).encode()
    }

    /// Encode as an inline request: keyword and arguments separated by
    /// single spaces, terminated by CRLF.
    ///
    /// No escaping is done. An argument containing whitespace or CRLF
    /// changes the meaning of the request; use [`Command::encode`] for
    /// arbitrary data.
    pub fn inline(&self) -> BytesMut {
        let mut buf = BytesMut::from(self.to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
