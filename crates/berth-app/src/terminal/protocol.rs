//! The first message a terminal client sends: which container to attach to.

use serde::Deserialize;
use serde_json::Value;

/// Why a first message did not start a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStart {
    /// Not a start directive at all.
    Malformed,
    /// A start directive without a usable container id.
    MissingContainerId,
}

impl InvalidStart {
    /// Text sent to the client before the connection is closed.
    pub fn message(self) -> &'static str {
        match self {
            InvalidStart::Malformed => "Invalid start message or missing containerId",
            InvalidStart::MissingContainerId => "Container ID is required",
        }
    }
}

/// A decoded first message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Start { container_id: String },
    Invalid(InvalidStart),
}

#[derive(Deserialize)]
struct RawStart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "containerId", default)]
    container_id: Value,
}

impl ControlMessage {
    /// Decode `{"type":"start","containerId":"<id>"}`.
    pub fn parse(frame: &[u8]) -> Self {
        let raw: RawStart = match serde_json::from_slice(frame) {
            Ok(raw) => raw,
            Err(_) => return ControlMessage::Invalid(InvalidStart::Malformed),
        };
        if raw.kind != "start" {
            return ControlMessage::Invalid(InvalidStart::Malformed);
        }
        match raw.container_id {
            // The id is a positional argument to the runtime; a leading dash would read as an option.
            Value::String(id) if id.trim_start().starts_with('-') => {
                ControlMessage::Invalid(InvalidStart::Malformed)
            }
            Value::String(id) if !id.trim().is_empty() => ControlMessage::Start { container_id: id },
            Value::String(_) | Value::Null => ControlMessage::Invalid(InvalidStart::MissingContainerId),
            _ => ControlMessage::Invalid(InvalidStart::Malformed),
        }
    }
}
