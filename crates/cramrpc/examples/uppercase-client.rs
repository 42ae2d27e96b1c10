//! One authenticated call against `uppercase-server`.
//!
//! Run with:
//!   cargo run --example uppercase-client --features peer

use cramrpc::peer::{Client, ClientConfig, StreamTransport};

const UPPERCASE: u32 = 0x2000_0001;
const TEXT: u32 = 0x2000_0007;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_path = std::env::temp_dir().join("cramrpc-uppercase.sock");
    let config = ClientConfig::default().with_key("example-secret");
    let transport = StreamTransport::connect_unix(&sock_path, config.max_payload)?;
    let mut client = Client::new(transport, config);

    let caps = client.capabilities()?;
    eprintln!("server needs auth: {} ({:?})", caps.need_auth, caps.hash);

    {
        let mut call = client.lock()?;
        call.params_mut().set_str(TEXT, "hello, world")?;
        let reply = call.exec(UPPERCASE, 0)?;
        println!("{}", reply.get_str(TEXT));
    }

    client.close()?;
    Ok(())
}
