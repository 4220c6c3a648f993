use std::fmt;
use std::io;

use openpeer_channel::ChannelError;
use openpeer_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
/// The peer answered a call with an error.
pub const REMOTE_ERROR: i32 = 70;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::HandshakeTimeout { .. } | ChannelError::CallTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        ChannelError::Remote(_) => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        ChannelError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ChannelError::NotConnected => CliError::new(FAILURE, format!("{context}: {err}")),
        ChannelError::Destroyed => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = channel_error(
            "call failed",
            ChannelError::CallTimeout {
                no: 1,
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);

        let err = channel_error("connect failed", ChannelError::HandshakeTimeout { attempts: 3 });
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn remote_errors_keep_peer_message() {
        let err = channel_error("call failed", ChannelError::Remote(json!("nope")));
        assert_eq!(err.code, REMOTE_ERROR);
        assert_eq!(err.to_string(), "call failed: remote execution failed: nope");
    }

    #[test]
    fn missing_socket_is_plain_failure() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                path: "/tmp/missing.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn closed_transport_is_transport_error() {
        let err = channel_error("push failed", ChannelError::Transport(TransportError::Closed));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
