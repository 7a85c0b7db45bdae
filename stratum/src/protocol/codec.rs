use serde_json::Value;

use crate::error::{Result, StratumError};
use crate::protocol::messages::Message;
use crate::protocol::MAX_LINE_SIZE;

const KNOWN_METHODS: &[&str] = &[
    "login",
    "job",
    "solution",
    "result",
    "solution_result",
    "cancel",
];

/// Serialize a message as a single `\n`-terminated JSON line.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one line (without the terminator). Unknown methods are reported
/// as [`StratumError::UnsupportedMethod`] so the caller can skip them
/// without treating the line as garbage.
pub fn decode(line: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(line)?;
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| StratumError::Malformed("missing `method` field".into()))?;
    if !KNOWN_METHODS.contains(&method) {
        return Err(StratumError::UnsupportedMethod(method.to_owned()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Accumulates raw stream chunks and yields complete `\n`-separated
/// lines. An unterminated run longer than the line cap poisons the
/// stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer::default()
    }

    pub fn split(&mut self, data: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            if pos + 1 > MAX_LINE_SIZE {
                return Err(StratumError::LineTooLong);
            }
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop(); // the terminator
            let line = String::from_utf8(line).map_err(|_| StratumError::BadEncoding)?;
            lines.push(line);
        }

        if self.buf.len() >= MAX_LINE_SIZE {
            return Err(StratumError::LineTooLong);
        }
        Ok(lines)
    }
}
