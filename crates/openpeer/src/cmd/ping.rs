use crate::cmd::{dial, parse_duration, PingArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_pings, OutputFormat};

pub async fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let timeout = parse_duration(&args.timeout)?;
    let channel = dial(&args.path, timeout).await?;

    let mut rtts = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        match channel.ping().await {
            Ok(rtt) => rtts.push(rtt),
            Err(err) => {
                channel.destroy();
                return Err(channel_error("ping failed", err));
            }
        }
    }
    channel.destroy();

    print_pings(&rtts, format);
    Ok(SUCCESS)
}
