//! Request execution and the two ends of a cramrpc connection.
//!
//! - [`Dispatcher`] applies the envelope rules, suppresses duplicates,
//!   authenticates and runs registered procedures
//! - [`Server`] drives a dispatcher from worker pools over stream,
//!   datagram and shared-memory transports
//! - [`Client`] makes one synchronous call at a time over any [`Transport`]
//!
//! ```no_run
//! use cramrpc_peer::{Client, ClientConfig, DatagramTransport};
//!
//! let transport = DatagramTransport::connect("127.0.0.1:7700")?;
//! let mut client = Client::new(transport, ClientConfig::default().with_key("secret"));
//! let mut call = client.lock()?;
//! call.params_mut().set_str(0x2000_0007, "hello")?;
//! let reply = call.exec(0x2000_0001, 0x2000_0001)?;
//! assert_eq!(reply.get_str(0x2000_0007), "HELLO");
//! # Ok::<(), cramrpc_peer::PeerError>(())
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod replay;
pub mod server;
pub mod transport;

pub use client::{CallGuard, Capabilities, Client};
pub use config::{CallLimiter, ClientConfig, ServerConfig};
pub use dispatch::{Acl, Call, Dispatcher, Object, Outcome, Procedure};
pub use envelope::client_check_header;
pub use error::{PeerError, Result};
pub use replay::{Identity, Replay, ReplayCache};
pub use server::{Server, ServerBuilder, ServerHandle, StreamListener};
pub use transport::{DatagramTransport, MemoryTransport, StreamTransport, Transport};
