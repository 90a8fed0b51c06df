//! Parsing of the relay's SSE lines on the client side.

use serde_json::Value;

use crate::sse::{self, DONE};

#[derive(Debug, PartialEq)]
pub enum StreamEvent {
    /// Next text fragment
    Content(String),
    /// End-of-stream sentinel
    Done,
    /// Failure reported by the relay after the stream started
    Error { message: String, code: Option<u64> },
    /// SSE comment, e.g. a keep-alive
    Comment,
}

/// Why a line could not be turned into an event. The caller logs these
/// and moves on to the next line.
#[derive(Debug, PartialEq)]
pub enum ParseFailure {
    InvalidJson { payload: String, reason: String },
    MissingContent(Value),
}

/// Parse one non-empty line of the relay's output.
pub fn parse_line(line: &str) -> Result<StreamEvent, ParseFailure> {
    if line.starts_with(':') {
        return Ok(StreamEvent::Comment);
    }

    let payload = sse::data_field(line).unwrap_or(line);
    if payload == DONE {
        return Ok(StreamEvent::Done);
    }

    let value: Value =
        serde_json::from_str(payload).map_err(|e| ParseFailure::InvalidJson {
            payload: payload.to_string(),
            reason: e.to_string(),
        })?;

    match &value["content"] {
        Value::String(content) => Ok(StreamEvent::Content(content.clone())),
        Value::Null => match value["error"].as_str() {
            Some(message) => Ok(StreamEvent::Error {
                message: message.to_string(),
                code: value["code"].as_u64(),
            }),
            None => Err(ParseFailure::MissingContent(value)),
        },
        // Non-string content is still text to the reader
        other => Ok(StreamEvent::Content(other.to_string())),
    }
}
