use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use openpeer_channel::{Channel, ChannelConfig, Endpoint, DEFAULT_MESSAGE_TYPE, PROTOCOL_VERSION};
use openpeer_frame::StreamTransport;
use openpeer_transport::UnixDomainSocket;

use crate::exit::{channel_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod ping;
pub mod push;
pub mod serve;
pub mod sign;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve built-in operations on a Unix socket and print pushed messages.
    Serve(ServeArgs),
    /// Call an operation on a serving peer.
    Call(CallArgs),
    /// Push one message to a serving peer.
    Push(PushArgs),
    /// Measure heartbeat round trips to a serving peer.
    Ping(PingArgs),
    /// Print the envelope signature for a timestamp.
    Sign(SignArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Push(args) => push::run(args).await,
        Command::Ping(args) => ping::run(args, format).await,
        Command::Sign(args) => sign::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Push types to print (comma-separated). Matching is exact.
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_MESSAGE_TYPE)]
    pub types: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Operation name.
    pub name: String,
    /// Arguments, one JSON value each (e.g. 2 '"text"' '{"a":1}').
    pub args: Vec<String>,
    /// Handshake and reply deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// JSON message.
    #[arg(long)]
    pub json: String,
    /// Message type.
    #[arg(long = "type", default_value = DEFAULT_MESSAGE_TYPE)]
    pub message_type: String,
    /// Handshake deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Number of heartbeats.
    #[arg(long, default_value_t = 1)]
    pub count: usize,
    /// Handshake deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// ISO-8601 UTC timestamp, e.g. 2024-02-26T02:33:33.140Z.
    pub time: String,
    /// Protocol version string.
    #[arg(long, default_value = PROTOCOL_VERSION)]
    pub protocol_version: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Connect to a serving peer and complete the handshake within `timeout`.
pub async fn dial(path: &Path, timeout: Duration) -> CliResult<Channel> {
    let stream = UnixDomainSocket::connect(path)
        .await
        .map_err(|err| transport_error("connect failed", err))?;

    let defaults = ChannelConfig::default();
    let config = ChannelConfig {
        name: "openpeer-cli".to_string(),
        call_timeout: Some(timeout),
        handshake_attempts: handshake_attempts(timeout, defaults.handshake_attempt_timeout),
        ..defaults
    };
    let channel = Channel::open(Arc::new(StreamTransport::new(stream)), config)
        .map_err(|err| channel_error("open failed", err))?;
    channel
        .try_connect(Endpoint::Primary)
        .await
        .map_err(|err| channel_error("handshake failed", err))?;
    Ok(channel)
}

/// Attempts that fit in `budget`, at least one.
fn handshake_attempts(budget: Duration, per_attempt: Duration) -> u32 {
    let attempts = budget.as_millis() / per_attempt.as_millis().max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
