use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use cramrpc_auth::HashAlgorithm;
use cramrpc_wire::ids::is_reserved;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod caps;
pub mod serve;
pub mod version;

/// First user id; the demo server registers its procedure and object here.
pub const UPPERCASE_ID: u32 = 0x2000_0001;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the uppercase demo server.
    Serve(ServeArgs),
    /// Make one call and print the reply parameters.
    Call(CallArgs),
    /// Ask a server whether it requires authentication.
    Caps(CapsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Caps(args) => caps::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Unix domain socket; ADDR is a filesystem path.
    Unix,
    /// TCP stream; ADDR is host:port.
    Tcp,
    /// UDP datagrams; ADDR is host:port.
    Udp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum HashArg {
    Sha256,
    Sha512,
}

impl From<HashArg> for HashAlgorithm {
    fn from(hash: HashArg) -> Self {
        match hash {
            HashArg::Sha256 => HashAlgorithm::HmacSha256,
            HashArg::Sha512 => HashAlgorithm::HmacSha512,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path (unix) or host:port (tcp, udp) to listen on.
    pub address: String,
    /// Transport to serve.
    #[arg(long, value_enum, default_value = "unix")]
    pub transport: TransportKind,
    /// Accepted key; repeat for several. Any key enables authentication.
    #[arg(long = "key", value_name = "SECRET", env = "CRAMRPC_KEY", hide_env_values = true)]
    pub keys: Vec<String>,
    /// Keyed hash used for signatures when authentication is enabled.
    #[arg(long, value_enum, default_value = "sha256")]
    pub hash: HashArg,
    /// Worker threads.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Socket path (unix) or host:port (tcp, udp) of the server.
    pub address: String,
    /// Transport to connect over.
    #[arg(long, value_enum, default_value = "unix")]
    pub transport: TransportKind,
    /// Time budget of one call (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Sends per call over udp.
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Procedure id, decimal or 0x-prefixed hex.
    #[arg(long = "proc", value_name = "ID", value_parser = parse_id, default_value = "0x20000001")]
    pub procedure: u32,
    /// Object id, 0 for none.
    #[arg(long, value_name = "ID", value_parser = parse_object_id, default_value = "0x20000001")]
    pub object: u32,
    /// String parameter as ID=TEXT; repeatable.
    #[arg(long = "param", value_name = "ID=TEXT", value_parser = parse_param)]
    pub params: Vec<(u32, String)>,
    /// Shared secret. Authenticates before the call when set.
    #[arg(long, value_name = "SECRET", env = "CRAMRPC_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

#[derive(Args, Debug)]
pub struct CapsArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_u32(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => input.replace('_', "").parse(),
    };
    parsed.map_err(|_| format!("invalid id: {input}"))
}

/// Application ids only; the protocol owns everything below 0x20000000.
pub fn parse_id(input: &str) -> Result<u32, String> {
    let id = parse_u32(input)?;
    if is_reserved(id) {
        return Err(format!("id {id:#x} is reserved for the protocol"));
    }
    Ok(id)
}

pub fn parse_object_id(input: &str) -> Result<u32, String> {
    match parse_u32(input)? {
        0 => Ok(0),
        _ => parse_id(input),
    }
}

pub fn parse_param(input: &str) -> Result<(u32, String), String> {
    let (id, text) = input
        .split_once('=')
        .ok_or_else(|| format!("expected ID=TEXT, got {input}"))?;
    Ok((parse_id(id)?, text.to_string()))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
