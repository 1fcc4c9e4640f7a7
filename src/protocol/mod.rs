//! Redis wire protocol plumbing.
//!
//! - `parser`: RESP2 frames
//! - `engine`: callback-driven, non-blocking protocol context

pub mod engine;
pub mod parser;

pub use engine::{
    AsyncContext, ConnectCallback, DisconnectCallback, EngineError, EventHooks, ReplyCallback,
};
pub use parser::{parse, Frame, ParseResult};
