//! Authenticated request/response RPC.
//!
//! A client fills a parameter buffer, the server runs the named procedure
//! on the named object and answers with the reply parameters. Sessions
//! may be mutually authenticated with a keyed challenge-response and
//! every request is applied at most once per sequence number.
//!
//! # Crate Structure
//!
//! - [`transport`]: sockets, datagrams and the shared-memory rendezvous
//! - [`wire`]: envelope header, parameter records and status codes
//! - [`auth`]: CRAM handshake, signing and session table
//! - [`peer`]: dispatcher, worker-pool server and synchronous client
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use cramrpc_transport::*;
}

/// Re-export wire types.
pub mod wire {
    pub use cramrpc_wire::*;
}

/// Re-export authentication types.
pub mod auth {
    pub use cramrpc_auth::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use cramrpc_peer::*;
}
