mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "cramrpc", version, about = "Authenticated RPC client and demo server")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{HashArg, TransportKind};

    #[test]
    fn parses_serve_with_repeated_keys() {
        let cli = Cli::try_parse_from([
            "cramrpc",
            "serve",
            "127.0.0.1:7700",
            "--transport",
            "udp",
            "--key",
            "alpha",
            "--key",
            "beta",
            "--hash",
            "sha512",
        ])
        .expect("serve args should parse");

        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.transport, TransportKind::Udp);
        assert_eq!(args.keys, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(args.hash, HashArg::Sha512);
        assert_eq!(args.workers, 4);
    }

    #[test]
    fn parses_call_with_params() {
        let cli = Cli::try_parse_from([
            "cramrpc",
            "--format",
            "json",
            "call",
            "/tmp/cramrpc.sock",
            "--proc",
            "0x20000001",
            "--object",
            "0",
            "--param",
            "0x20000007=hello",
            "--param",
            "0x20000008=world",
        ])
        .expect("call args should parse");

        let Command::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.procedure, 0x2000_0001);
        assert_eq!(args.object, 0);
        assert_eq!(args.params.len(), 2);
        assert_eq!(args.params[1], (0x2000_0008, "world".to_string()));
        assert_eq!(args.connect.transport, TransportKind::Unix);
    }

    #[test]
    fn rejects_reserved_procedure() {
        let err = Cli::try_parse_from(["cramrpc", "call", "/tmp/x.sock", "--proc", "2"])
            .expect_err("reserved procedure should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_caps_subcommand() {
        let cli = Cli::try_parse_from([
            "cramrpc",
            "caps",
            "127.0.0.1:7700",
            "--transport",
            "tcp",
            "--timeout",
            "500ms",
        ])
        .expect("caps args should parse");
        assert!(matches!(cli.command, Command::Caps(_)));
    }
}
