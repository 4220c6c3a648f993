use openpeer_channel::sign;

use crate::cmd::SignArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_signature, OutputFormat};

pub fn run(args: SignArgs, format: OutputFormat) -> CliResult<i32> {
    let signature = sign(&args.time, &args.protocol_version);
    print_signature(&args.time, &args.protocol_version, &signature, format);
    Ok(SUCCESS)
}
