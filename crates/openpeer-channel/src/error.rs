use std::time::Duration;

use serde_json::Value;

/// Errors surfaced by channel operations.
///
/// Malformed or foreign frames are never errors: they are dropped before
/// they reach any caller.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A call needs an established peer and no handshake has succeeded.
    #[error("channel is not connected")]
    NotConnected,

    /// Every handshake attempt went unanswered.
    #[error("handshake timed out after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    /// No reply arrived within the deadline.
    #[error("no reply to #{no} within {timeout:?}")]
    CallTimeout { no: u64, timeout: Duration },

    /// The peer answered with an error: its operation failed or did not exist.
    #[error("remote execution failed: {}", display_remote(.0))]
    Remote(Value),

    /// The channel was destroyed before or while the operation ran.
    #[error("channel destroyed")]
    Destroyed,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] openpeer_transport::TransportError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChannelError {
    /// The peer's error payload, for [`ChannelError::Remote`].
    pub fn remote_payload(&self) -> Option<&Value> {
        match self {
            ChannelError::Remote(value) => Some(value),
            _ => None,
        }
    }
}

fn display_remote(value: &Value) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
