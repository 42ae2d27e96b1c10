use crate::cmd::call::connect;
use crate::cmd::CapsArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_capabilities, OutputFormat};

pub fn run(args: CapsArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = connect(&args.connect, None)?;
    let caps = client
        .capabilities()
        .map_err(|err| peer_error("capabilities probe failed", err))?;
    print_capabilities(&args.connect.address, caps, format);
    Ok(SUCCESS)
}
