use serde_json::Value;

use crate::cmd::{dial, parse_duration, PushArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};

pub async fn run(args: PushArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let message: Value = serde_json::from_str(&args.json)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;

    let channel = dial(&args.path, timeout).await?;
    let pushed = channel.push(message, &args.message_type);
    // Pushes are unacknowledged; a heartbeat behind it on the same stream
    // confirms the peer has read it before we exit.
    let flushed = match pushed {
        Ok(()) => channel.ping().await.map(|_| ()),
        Err(err) => Err(err),
    };
    channel.destroy();

    flushed.map_err(|err| channel_error("push failed", err))?;
    Ok(SUCCESS)
}
