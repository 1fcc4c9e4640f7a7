//! RESP2 frame parsing and encoding.
//!
//! The engine feeds its input buffer through [`parse`] after every read and
//! hands each complete frame to the oldest waiting callback. Requests are
//! encoded as arrays of bulk strings, which is binary-safe.

use bytes::{Bytes, BytesMut};

/// A single RESP2 frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`, or `$-1\r\n` for null
    Bulk(Option<Bytes>),
    /// `*2\r\n...`, or `*-1\r\n` for null
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Encode a frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode a frame into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(buf, b'+', s.as_bytes()),
            Frame::Error(s) => put_line(buf, b'-', s.as_bytes()),
            Frame::Integer(n) => put_line(buf, b':', n.to_string().as_bytes()),
            Frame::Bulk(None) => buf.extend_from_slice(b"$-1\r\n"),
            Frame::Bulk(Some(data)) => {
                put_line(buf, b'$', data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
            Frame::Array(Some(frames)) => {
                put_line(buf, b'*', frames.len().to_string().as_bytes());
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    /// Short name of the frame type, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(Some(_)) => "bulk",
            Frame::Array(Some(_)) => "array",
            Frame::Bulk(None) | Frame::Array(None) => "null",
        }
    }
}

fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.extend_from_slice(&[prefix]);
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\r\n");
}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// A complete frame and the number of bytes it occupied
    Complete(Frame, usize),
    /// Need more data
    Incomplete,
    /// The buffer does not hold a valid frame
    Error(String),
}

/// Deepest array nesting accepted from the peer.
pub const MAX_DEPTH: usize = 512;

/// Parse one RESP frame from the front of `buffer`.
pub fn parse(buffer: &[u8]) -> ParseResult {
    parse_at(buffer, 0)
}

fn parse_at(buffer: &[u8], depth: usize) -> ParseResult {
    let Some(&tag) = buffer.first() else {
        return ParseResult::Incomplete;
    };
    let Some(line_end) = find_crlf(buffer) else {
        return ParseResult::Incomplete;
    };
    let line = &buffer[1..line_end];
    let body_start = line_end + 2;

    match tag {
        b'+' => match text(line, "status") {
            Ok(s) => ParseResult::Complete(Frame::Simple(s), body_start),
            Err(e) => ParseResult::Error(e),
        },
        b'-' => match text(line, "error") {
            Ok(s) => ParseResult::Complete(Frame::Error(s), body_start),
            Err(e) => ParseResult::Error(e),
        },
        b':' => match number(line, "integer") {
            Ok(n) => ParseResult::Complete(Frame::Integer(n), body_start),
            Err(e) => ParseResult::Error(e),
        },
        b'$' => match number(line, "bulk length") {
            Ok(n) if n < 0 => ParseResult::Complete(Frame::Bulk(None), body_start),
            Ok(n) => parse_bulk_body(buffer, body_start, n as usize),
            Err(e) => ParseResult::Error(e),
        },
        b'*' => match number(line, "array length") {
            Ok(n) if n < 0 => ParseResult::Complete(Frame::Array(None), body_start),
            Ok(_) if depth >= MAX_DEPTH => {
                ParseResult::Error(format!("Arrays nested deeper than {MAX_DEPTH}"))
            }
            Ok(n) => parse_array_body(buffer, body_start, n as usize, depth + 1),
            Err(e) => ParseResult::Error(e),
        },
        other => ParseResult::Error(format!("Unknown frame type: {}", other as char)),
    }
}

/// Find CRLF in buffer, return position of \r
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

fn text(line: &[u8], what: &str) -> Result<String, String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| format!("Invalid UTF-8 in {what}"))
}

fn number(line: &[u8], what: &str) -> Result<i64, String> {
    let s = std::str::from_utf8(line).map_err(|_| format!("Invalid UTF-8 in {what}"))?;
    s.parse::<i64>().map_err(|_| format!("Invalid {what}: {s}"))
}

fn parse_bulk_body(buffer: &[u8], start: usize, len: usize) -> ParseResult {
    let end = start + len;
    if buffer.len() < end + 2 {
        return ParseResult::Incomplete;
    }
    if &buffer[end..end + 2] != b"\r\n" {
        return ParseResult::Error("Bulk string missing trailing CRLF".to_string());
    }
    let data = Bytes::copy_from_slice(&buffer[start..end]);
    ParseResult::Complete(Frame::Bulk(Some(data)), end + 2)
}

fn parse_array_body(buffer: &[u8], start: usize, len: usize, depth: usize) -> ParseResult {
    let mut offset = start;
    // Cap the preallocation; the length prefix comes from the peer.
    let mut frames = Vec::with_capacity(len.min(1024));

    for _ in 0..len {
        match parse_at(&buffer[offset..], depth) {
            ParseResult::Complete(frame, consumed) => {
                frames.push(frame);
                offset += consumed;
            }
            other => return other,
        }
    }

    ParseResult::Complete(Frame::Array(Some(frames)), offset)
}
