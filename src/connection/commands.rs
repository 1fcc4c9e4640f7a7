//! Typed wrappers over [`Connection::issue`].
//!
//! Every helper sends exactly one command and converts the reply. A reply of
//! the wrong shape, including an error reply or nil where a value was
//! expected, is an [`Error::Protocol`]; a string that is not a number where
//! one was expected is an [`Error::Data`].

use super::Connection;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::reply::Reply;
use std::str::FromStr;

/// Where [`Connection::linsert`] places the new element relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pivot {
    Before,
    After,
}

impl Pivot {
    fn keyword(self) -> &'static str {
        match self {
            Pivot::Before => "BEFORE",
            Pivot::After => "AFTER",
        }
    }
}

fn parse_number<T: FromStr>(value: String, target: &'static str) -> Result<T> {
    match value.trim().parse() {
        Ok(n) => Ok(n),
        Err(_) => Err(Error::Data { value, target }),
    }
}

/// `[key, value]` from a blocking pop; anything else is a failure.
fn popped_value(reply: Reply) -> Result<String> {
    let items = reply.into_array()?;
    let [_key, value] = <[Reply; 2]>::try_from(items)
        .map_err(|items| Error::protocol("two-element array", Reply::Array(items)))?;
    value.into_string()
}

fn pairs(items: Vec<String>) -> Result<Vec<(String, String)>> {
    if items.len() % 2 != 0 {
        let found = Reply::Array(items.into_iter().map(Reply::String).collect());
        return Err(Error::protocol("field/value array", found));
    }
    let mut items = items.into_iter();
    let mut out = Vec::with_capacity(items.len() / 2);
    while let (Some(field), Some(value)) = (items.next(), items.next()) {
        out.push((field, value));
    }
    Ok(out)
}

impl Connection {
    fn call(&mut self, command: Command) -> Result<Reply> {
        self.issue(&command)
    }

    fn call_ok(&mut self, command: Command) -> Result<()> {
        self.issue(&command)?.check()
    }

    fn call_int(&mut self, command: Command) -> Result<i64> {
        self.issue(&command)?.into_integer()
    }

    fn call_bool(&mut self, command: Command) -> Result<bool> {
        Ok(self.call_int(command)? != 0)
    }

    fn call_string(&mut self, command: Command) -> Result<String> {
        self.issue(&command)?.into_string()
    }

    fn call_strings(&mut self, command: Command) -> Result<Vec<String>> {
        self.issue(&command)?.into_string_array()
    }

    pub fn ping(&mut self) -> Result<()> {
        match self.call(Command::new("PING"))? {
            Reply::Status(_) | Reply::String(_) => Ok(()),
            other => Err(Error::protocol("status", other)),
        }
    }

    // Strings

    /// Fails on a missing key rather than returning an empty string.
    pub fn get(&mut self, key: &str) -> Result<String> {
        self.call_string(Command::new("GET").arg(key))
    }

    pub fn get_int(&mut self, key: &str) -> Result<i64> {
        let value = self.get(key)?;
        parse_number(value, "integer")
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.call_ok(Command::new("SET").arg(key).arg(value))
    }

    /// Returns whether the key was set.
    pub fn setnx(&mut self, key: &str, value: &str) -> Result<bool> {
        self.call_bool(Command::new("SETNX").arg(key).arg(value))
    }

    pub fn setex(&mut self, key: &str, seconds: u64, value: &str) -> Result<()> {
        self.call_ok(Command::new("SETEX").arg(key).arg(seconds).arg(value))
    }

    /// Store `value` and return the previous value parsed as an integer.
    pub fn getset(&mut self, key: &str, value: &str) -> Result<i64> {
        let old = self.call_string(Command::new("GETSET").arg(key).arg(value))?;
        parse_number(old, "integer")
    }

    /// Returns the new length of the string.
    pub fn append(&mut self, key: &str, value: &str) -> Result<i64> {
        self.call_int(Command::new("APPEND").arg(key).arg(value))
    }

    /// Returns the number of keys removed.
    pub fn del(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("DEL").arg(key))
    }

    pub fn incr(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("INCR").arg(key))
    }

    pub fn decr(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("DECR").arg(key))
    }

    pub fn incr_by(&mut self, key: &str, by: i64) -> Result<i64> {
        self.call_int(Command::new("INCRBY").arg(key).arg(by))
    }

    pub fn decr_by(&mut self, key: &str, by: i64) -> Result<i64> {
        self.call_int(Command::new("DECRBY").arg(key).arg(by))
    }

    /// One entry per key; missing keys are `None`.
    pub fn mget(&mut self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let command = keys.iter().fold(Command::new("MGET"), |cmd, key| cmd.arg(key));
        self.issue(&command)?.into_optional_strings()
    }

    // Lists

    pub fn lpush(&mut self, key: &str, value: &str) -> Result<i64> {
        self.call_int(Command::new("LPUSH").arg(key).arg(value))
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> Result<i64> {
        self.call_int(Command::new("RPUSH").arg(key).arg(value))
    }

    /// Push only if the list exists; returns the new length, 0 if it did not.
    pub fn lpushx(&mut self, key: &str, value: &str) -> Result<i64> {
        self.call_int(Command::new("LPUSHX").arg(key).arg(value))
    }

    pub fn rpushx(&mut self, key: &str, value: &str) -> Result<i64> {
        self.call_int(Command::new("RPUSHX").arg(key).arg(value))
    }

    /// Move the tail of `source` to the head of `destination`.
    pub fn rpoplpush(&mut self, source: &str, destination: &str) -> Result<String> {
        self.call_string(Command::new("RPOPLPUSH").arg(source).arg(destination))
    }

    /// Returns the number of elements removed.
    pub fn lrem(&mut self, key: &str, count: i64, value: &str) -> Result<i64> {
        self.call_int(Command::new("LREM").arg(key).arg(count).arg(value))
    }

    pub fn lset(&mut self, key: &str, index: i64, value: &str) -> Result<()> {
        self.call_ok(Command::new("LSET").arg(key).arg(index).arg(value))
    }

    /// Returns the new length, or -1 if `pivot` was not found.
    pub fn linsert(&mut self, key: &str, side: Pivot, pivot: &str, value: &str) -> Result<i64> {
        self.call_int(
            Command::new("LINSERT")
                .arg(key)
                .arg(side.keyword())
                .arg(pivot)
                .arg(value),
        )
    }

    /// Fails if `index` is out of range.
    pub fn lindex(&mut self, key: &str, index: i64) -> Result<String> {
        self.call_string(Command::new("LINDEX").arg(key).arg(index))
    }

    pub fn lpop(&mut self, key: &str) -> Result<String> {
        self.call_string(Command::new("LPOP").arg(key))
    }

    pub fn rpop(&mut self, key: &str) -> Result<String> {
        self.call_string(Command::new("RPOP").arg(key))
    }

    pub fn llen(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("LLEN").arg(key))
    }

    pub fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.call_strings(Command::new("LRANGE").arg(key).arg(start).arg(stop))
    }

    pub fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.call_ok(Command::new("LTRIM").arg(key).arg(start).arg(stop))
    }

    /// Blocking pop from the head. The server waits up to `timeout` seconds
    /// and a timeout is reported as a failure.
    pub fn blpop(&mut self, key: &str, timeout: u64) -> Result<String> {
        popped_value(self.call(Command::new("BLPOP").arg(key).arg(timeout))?)
    }

    /// Blocking pop from the tail, see [`Connection::blpop`].
    pub fn brpop(&mut self, key: &str, timeout: u64) -> Result<String> {
        popped_value(self.call(Command::new("BRPOP").arg(key).arg(timeout))?)
    }

    // Sets

    pub fn sadd(&mut self, key: &str, member: &str) -> Result<i64> {
        self.call_int(Command::new("SADD").arg(key).arg(member))
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<i64> {
        self.call_int(Command::new("SREM").arg(key).arg(member))
    }

    pub fn scard(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("SCARD").arg(key))
    }

    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        self.call_strings(Command::new("SMEMBERS").arg(key))
    }

    pub fn sismember(&mut self, key: &str, member: &str) -> Result<bool> {
        self.call_bool(Command::new("SISMEMBER").arg(key).arg(member))
    }

    pub fn spop(&mut self, key: &str) -> Result<String> {
        self.call_string(Command::new("SPOP").arg(key))
    }

    pub fn sunion(&mut self, key: &str, other: &str) -> Result<Vec<String>> {
        self.call_strings(Command::new("SUNION").arg(key).arg(other))
    }

    pub fn sdiff(&mut self, key: &str, other: &str) -> Result<Vec<String>> {
        self.call_strings(Command::new("SDIFF").arg(key).arg(other))
    }

    pub fn sinter(&mut self, key: &str, other: &str) -> Result<Vec<String>> {
        self.call_strings(Command::new("SINTER").arg(key).arg(other))
    }

    // Hashes

    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<i64> {
        self.call_int(Command::new("HSET").arg(key).arg(field).arg(value))
    }

    pub fn hget(&mut self, key: &str, field: &str) -> Result<String> {
        self.call_string(Command::new("HGET").arg(key).arg(field))
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> Result<i64> {
        self.call_int(Command::new("HDEL").arg(key).arg(field))
    }

    pub fn hexists(&mut self, key: &str, field: &str) -> Result<bool> {
        self.call_bool(Command::new("HEXISTS").arg(key).arg(field))
    }

    pub fn hlen(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("HLEN").arg(key))
    }

    pub fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>> {
        pairs(self.call_strings(Command::new("HGETALL").arg(key))?)
    }

    pub fn hkeys(&mut self, key: &str) -> Result<Vec<String>> {
        self.call_strings(Command::new("HKEYS").arg(key))
    }

    pub fn hvals(&mut self, key: &str) -> Result<Vec<String>> {
        self.call_strings(Command::new("HVALS").arg(key))
    }

    // Sorted sets

    pub fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<i64> {
        self.call_int(Command::new("ZADD").arg(key).arg(score).arg(member))
    }

    pub fn zcard(&mut self, key: &str) -> Result<i64> {
        self.call_int(Command::new("ZCARD").arg(key))
    }

    pub fn zcount(&mut self, key: &str, min: f64, max: f64) -> Result<i64> {
        self.call_int(Command::new("ZCOUNT").arg(key).arg(min).arg(max))
    }

    pub fn zrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.call_strings(Command::new("ZRANGE").arg(key).arg(start).arg(stop))
    }

    /// Fails if `member` is not in the set.
    pub fn zrank(&mut self, key: &str, member: &str) -> Result<i64> {
        self.call_int(Command::new("ZRANK").arg(key).arg(member))
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> Result<i64> {
        self.call_int(Command::new("ZREM").arg(key).arg(member))
    }

    /// Returns the number of members removed.
    pub fn zrem_range_by_rank(&mut self, key: &str, start: i64, stop: i64) -> Result<i64> {
        self.call_int(Command::new("ZREMRANGEBYRANK").arg(key).arg(start).arg(stop))
    }

    pub fn zscore(&mut self, key: &str, member: &str) -> Result<f64> {
        let score = self.call_string(Command::new("ZSCORE").arg(key).arg(member))?;
        parse_number(score, "float")
    }
}
