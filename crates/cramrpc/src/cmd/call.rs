use cramrpc_peer::{Client, ClientConfig, DatagramTransport, StreamTransport, Transport};
use tracing::debug;

use crate::cmd::{parse_duration, CallArgs, ConnectArgs, TransportKind};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = connect(&args.connect, args.key.as_deref())?;

    let mut call = client
        .lock()
        .map_err(|err| peer_error("call failed", err))?;
    for (id, text) in &args.params {
        call.params_mut()
            .set_str(*id, text)
            .map_err(|err| peer_error("call failed", err.into()))?;
    }
    let reply = call
        .exec(args.procedure, args.object)
        .map_err(|err| peer_error("call failed", err))?;
    print_reply(reply, args.procedure, args.object, format);
    drop(call);

    if let Err(err) = client.close() {
        debug!(error = %err, "logout after call failed");
    }
    Ok(SUCCESS)
}

/// Open a client over the transport named on the command line.
pub fn connect(
    args: &ConnectArgs,
    key: Option<&str>,
) -> CliResult<Client<Box<dyn Transport>>> {
    let mut config = ClientConfig {
        timeout: parse_duration(&args.timeout)?,
        attempts: args.attempts,
        ..ClientConfig::default()
    };
    if let Some(key) = key {
        config = config.with_key(key);
    }

    let address = args.address.as_str();
    let transport: Box<dyn Transport> = match args.transport {
        #[cfg(unix)]
        TransportKind::Unix => Box::new(
            StreamTransport::connect_unix(address, config.max_payload)
                .map_err(|err| peer_error("connect failed", err))?,
        ),
        #[cfg(not(unix))]
        TransportKind::Unix => {
            return Err(crate::exit::CliError::new(
                crate::exit::USAGE,
                "unix sockets are not available on this platform",
            ))
        }
        TransportKind::Tcp => Box::new(
            StreamTransport::connect_tcp(address, config.timeout, config.max_payload)
                .map_err(|err| peer_error("connect failed", err))?,
        ),
        TransportKind::Udp => Box::new(
            DatagramTransport::connect(address)
                .map_err(|err| peer_error("connect failed", err))?,
        ),
    };
    debug!(address, transport = transport.name(), "connected");
    Ok(Client::new(transport, config))
}
