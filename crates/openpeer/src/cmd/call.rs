use serde_json::Value;
use tokio::time::Instant;

use crate::cmd::{dial, parse_duration, CallArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_call, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let call_args = parse_args(&args.args)?;

    let channel = dial(&args.path, timeout).await?;
    let started = Instant::now();
    let outcome = channel.call(args.name.as_str(), call_args).await;
    channel.destroy();

    let result = outcome.map_err(|err| channel_error("call failed", err))?;
    print_call(&args.name, &result, started.elapsed(), format);
    Ok(SUCCESS)
}

/// Each argument is JSON; anything that does not parse is taken as a string.
fn parse_args(raw: &[String]) -> CliResult<Vec<Value>> {
    raw.iter()
        .map(|arg| {
            if arg.trim().is_empty() {
                return Err(CliError::new(USAGE, "empty argument"));
            }
            Ok(serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        })
        .collect()
}
