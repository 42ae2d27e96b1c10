use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cramrpc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: cramrpc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: {}.{}",
        cramrpc_wire::VERSION_MAJOR,
        cramrpc_wire::VERSION_MINOR
    );
    println!(
        "target: {}",
        option_env!("CRAMRPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CRAMRPC_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("hashes: hmac-sha256, hmac-sha512");
    println!("transports: unix, tcp, udp, shm (in-process)");
    println!("features: peer={}, cli=true", cfg!(feature = "peer"));

    Ok(SUCCESS)
}
