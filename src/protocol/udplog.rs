//! Server log events streamed as one JSON object per UDP datagram.
//!
//! The producer does not escape quotes inside the message text, so a datagram
//! that fails to parse gets one repair pass: everything between
//! `"message":"` and the closing `"}` is treated as the message and its
//! quotes are re-escaped.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::common::error::{ProtocolError, ProtocolResult};

const MESSAGE_FIELD: &str = "\"message\":\"";
const OBJECT_TAIL: &str = "\"}";

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEvent {
    #[serde(default, alias = "timeMillis", deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[serde(alias = "loggerName")]
    pub logger: String,
    pub message: String,
    #[serde(default)]
    pub thread: String,
    #[serde(default)]
    pub level: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Decode one datagram, repairing the message quoting if needed.
pub fn decode_datagram(data: &[u8]) -> ProtocolResult<LogEvent> {
    let text = String::from_utf8_lossy(data);
    let text = text.trim();
    let text = text.strip_prefix(',').unwrap_or(text).trim();

    if text.is_empty() {
        return Err(ProtocolError::InvalidDatagram {
            message: "empty datagram".to_string(),
        });
    }

    match serde_json::from_str(text) {
        Ok(event) => Ok(event),
        Err(first) => match repair_message_quotes(text) {
            Some(repaired) => Ok(serde_json::from_str(&repaired)?),
            None => Err(first.into()),
        },
    }
}

/// Re-escape quotes inside the trailing `message` field.
///
/// Returns `None` if the datagram does not end with a message field.
pub fn repair_message_quotes(text: &str) -> Option<String> {
    let start = text.find(MESSAGE_FIELD)? + MESSAGE_FIELD.len();
    let end = text.len().checked_sub(OBJECT_TAIL.len())?;
    if end < start || !text.ends_with(OBJECT_TAIL) {
        return None;
    }

    let message = text[start..end].replace("\\\"", "\"").replace('"', "\\\"");
    Some(format!("{}{}{}", &text[..start], message, OBJECT_TAIL))
}
