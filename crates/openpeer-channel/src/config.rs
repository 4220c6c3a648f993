use std::time::Duration;

use crate::codec::PROTOCOL_VERSION;

/// Default channel name, used in log spans.
pub const DEFAULT_CHANNEL_NAME: &str = "open-peer-channel";

/// Default deadline for a remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for each handshake attempt.
pub const DEFAULT_HANDSHAKE_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default number of handshake attempts (about 30s with the default attempt timeout).
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 300;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Label for this channel in logs.
    pub name: String,
    /// Protocol version stamped on and required of every envelope.
    pub version: String,
    /// Deadline for [`Channel::call`](crate::Channel::call). `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// How long each handshake attempt waits for its reply.
    pub handshake_attempt_timeout: Duration,
    /// Handshake attempts before `connect` gives up.
    pub handshake_attempts: u32,
    /// Fail calls with `NotConnected` until a handshake has succeeded.
    pub require_connection: bool,
}

impl ChannelConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Deadline for a heartbeat round trip.
    pub fn ping_timeout(&self) -> Duration {
        self.handshake_attempt_timeout * 10
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHANNEL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            handshake_attempt_timeout: DEFAULT_HANDSHAKE_ATTEMPT_TIMEOUT,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            require_connection: false,
        }
    }
}
