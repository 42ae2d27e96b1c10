//! Transport primitives for cramrpc.
//!
//! Three interchangeable media carry the same envelope bytes:
//! - reliable streams ([`IpcStream`] over Unix domain sockets or TCP)
//! - lossy datagrams ([`DatagramSocket`] over UDP)
//! - same-host shared-memory rendezvous ([`Rendezvous`])
//!
//! This is the lowest layer of cramrpc. Nothing here knows about the
//! envelope layout; framing lives in `cramrpc-wire`.

pub mod error;
pub mod shm;
pub mod sync;
pub mod tcp;
pub mod traits;
pub mod udp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use shm::{Rendezvous, RendezvousClient, RendezvousRequest};
pub use sync::{Permit, Semaphore};
pub use tcp::TcpSocket;
pub use traits::IpcStream;
pub use udp::DatagramSocket;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
