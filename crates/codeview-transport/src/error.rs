//! Transport and channel errors.

use std::time::Duration;

use serde_json::Value;

/// Failure to establish a link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Connection refused: {0}")]
    Refused(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single request on an open channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel closed before a response arrived.
    #[error("Channel closed")]
    ChannelClosed,
    #[error("No response within {0:?}")]
    Timeout(Duration),
    /// The remote answered with an `error` field.
    #[error("Remote error: {}", remote_text(.0))]
    Remote(Value),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChannelError {
    /// Text of a remote error, if this is one.
    ///
    /// String errors are returned as-is; structured errors are rendered as JSON.
    #[must_use]
    pub fn remote_message(&self) -> Option<String> {
        match self {
            Self::Remote(value) => Some(remote_text(value)),
            _ => None,
        }
    }
}

fn remote_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
