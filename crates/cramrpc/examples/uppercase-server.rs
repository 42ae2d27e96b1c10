//! Authenticated uppercase server on a Unix domain socket.
//!
//! Run with:
//!   cargo run --example uppercase-server --features peer
//!
//! In another terminal:
//!   cargo run --example uppercase-client --features peer

use std::time::Duration;

use cramrpc::auth::KeyRecord;
use cramrpc::peer::{Call, Server, ServerConfig};
use cramrpc::transport::UnixDomainSocket;
use cramrpc::wire::Status;

const UPPERCASE: u32 = 0x2000_0001;
const TEXT: u32 = 0x2000_0007;

fn uppercase(call: &mut Call<'_>) -> Status {
    let text = call.input().get_str(TEXT).to_uppercase();
    match call.output().set_str(TEXT, &text) {
        Ok(()) => Status::Ok,
        Err(_) => Status::Fail,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_path = std::env::temp_dir().join("cramrpc-uppercase.sock");

    let server = Server::builder(ServerConfig::default())
        .procedure(UPPERCASE, uppercase)
        .key(KeyRecord::new("example-secret"))
        .build()?;
    let handle = server.serve_stream(UnixDomainSocket::bind(&sock_path)?)?;
    eprintln!("Listening on {}", sock_path.display());

    // Serve for a minute, then shut the workers down.
    std::thread::sleep(Duration::from_secs(60));
    handle.join()?;
    Ok(())
}
