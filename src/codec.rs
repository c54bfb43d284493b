//! Sentinel-delimited result protocol between a spawned program and the engine.
//!
//! A program reports its structured result by printing one line of the form
//! `<$output> {json} </$output>`. Anything else on stdout (debug prints,
//! partial tracebacks) is noise: it is kept in the raw output for diagnostics
//! but never parsed.
//!
//! Encoders escape `<` inside the JSON payload as `\u003c`, so a payload can
//! never contain the end sentinel even when a string value mentions it.

use serde_json::Value;

pub const START_SENTINEL: &str = "<$output>";
pub const END_SENTINEL: &str = "</$output>";

/// Longest payload excerpt kept in an error message.
const PAYLOAD_EXCERPT_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no {} marker found in program output", START_SENTINEL)]
    MissingStart,

    #[error("no {} marker found after the result start marker", END_SENTINEL)]
    MissingEnd,

    #[error("result payload is not valid JSON ({source}): {payload}")]
    InvalidJson {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("result payload must be a JSON object, got: {0}")]
    NotAnObject(String),
}

impl ProtocolError {
    /// True when no result span exists at all, as opposed to a malformed one.
    pub fn is_missing_span(&self) -> bool {
        matches!(self, Self::MissingStart | Self::MissingEnd)
    }
}

/// Render the result line a program would print for `value`.
pub fn encode(value: &Value) -> String {
    let json = value.to_string().replace('<', "\\u003c");
    format!("{} {} {}", START_SENTINEL, json, END_SENTINEL)
}

/// Extract the first sentinel-delimited payload from captured stdout.
pub fn decode(stdout: &str) -> Result<Value, ProtocolError> {
    let start = stdout.find(START_SENTINEL).ok_or(ProtocolError::MissingStart)?;
    let rest = &stdout[start + START_SENTINEL.len()..];
    let end = rest.find(END_SENTINEL).ok_or(ProtocolError::MissingEnd)?;
    let payload = rest[..end].trim();

    serde_json::from_str(payload).map_err(|source| ProtocolError::InvalidJson {
        payload: excerpt(payload),
        source,
    })
}

/// Decode a payload that must be a JSON object.
pub fn decode_object(stdout: &str) -> Result<serde_json::Map<String, Value>, ProtocolError> {
    match decode(stdout)? {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::NotAnObject(excerpt(&other.to_string()))),
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= PAYLOAD_EXCERPT_LEN {
        return text.to_string();
    }
    let cut: String = text.chars().take(PAYLOAD_EXCERPT_LEN).collect();
    format!("{}...", cut)
}
