use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cramrpc_auth::{AuthConfig, KeyRecord};
use cramrpc_peer::{Call, Server, ServerConfig, ServerHandle};
use cramrpc_transport::{DatagramSocket, TcpSocket};
use cramrpc_wire::ids::is_reserved;
use cramrpc_wire::Status;
use tracing::{info, warn};

use crate::cmd::{ServeArgs, TransportKind, UPPERCASE_ID};
use crate::exit::{peer_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

/// State behind the demo object.
#[derive(Debug, Default)]
pub struct Uppercase {
    calls: AtomicU64,
}

/// Answer every string parameter with its uppercase form under the same id.
pub fn uppercase(call: &mut Call<'_>) -> Status {
    let Some(state) = call.instance::<Uppercase>() else {
        return Status::NoObj;
    };
    state.calls.fetch_add(1, Ordering::Relaxed);

    let strings: Vec<(u32, String)> = call
        .input()
        .records()
        .filter_map(|record| record.ok())
        .filter(|record| !is_reserved(record.id))
        .filter_map(|record| {
            let text = record.data.strip_suffix(&[0])?;
            let text = std::str::from_utf8(text).ok()?;
            Some((record.id, text.to_uppercase()))
        })
        .collect();

    let output = call.output();
    for (id, text) in &strings {
        if output.set_str(*id, text).is_err() {
            return Status::Fail;
        }
    }
    Status::Ok
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let mut config = ServerConfig {
        workers: args.workers,
        ..ServerConfig::default()
    };
    if !args.keys.is_empty() {
        config.auth = Some(AuthConfig {
            hash: args.hash.into(),
            ..AuthConfig::default()
        });
    }

    let mut builder = Server::builder(config)
        .procedure(UPPERCASE_ID, uppercase)
        .object(UPPERCASE_ID, Uppercase::default());
    for key in args.keys.iter().filter(|key| !key.is_empty()) {
        builder = builder.key(KeyRecord::new(key));
    }
    let server = builder
        .build()
        .map_err(|err| peer_error("server setup failed", err))?;

    let handle = start(&server, &args)?;
    info!(
        address = %args.address,
        transport = ?args.transport,
        workers = args.workers,
        auth = !args.keys.is_empty(),
        "serving uppercase demo"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    while running.load(Ordering::SeqCst) && handle.is_running() {
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    handle.shutdown();
    handle
        .join()
        .map_err(|err| peer_error("shutdown failed", err))?;
    Ok(SUCCESS)
}

fn start(server: &Server, args: &ServeArgs) -> CliResult<ServerHandle> {
    let address = args.address.as_str();
    let handle = match args.transport {
        #[cfg(unix)]
        TransportKind::Unix => {
            let listener = cramrpc_transport::UnixDomainSocket::bind(address)
                .map_err(|err| transport_error("bind failed", err))?;
            server.serve_stream(listener)
        }
        #[cfg(not(unix))]
        TransportKind::Unix => {
            return Err(CliError::new(
                USAGE,
                "unix sockets are not available on this platform",
            ))
        }
        TransportKind::Tcp => {
            let listener =
                TcpSocket::bind(address).map_err(|err| transport_error("bind failed", err))?;
            server.serve_stream(listener)
        }
        TransportKind::Udp => {
            let socket = DatagramSocket::bind(address)
                .map_err(|err| transport_error("bind failed", err))?;
            server.serve_datagram(socket)
        }
    };
    handle.map_err(|err| match err {
        cramrpc_peer::PeerError::InvalidConfig(message) => CliError::new(USAGE, message),
        other => peer_error("server start failed", other),
    })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if !running.swap(false, Ordering::SeqCst) {
            warn!("second interrupt, exiting");
            std::process::exit(INTERNAL);
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
