//! The transport contract the client is written against.
//!
//! An adapter moves one complete envelope each way. Streams and the
//! shared-memory rendezvous are ordered and lossless; datagrams may be
//! lost, duplicated or reordered, which the sequence number makes safe.

use std::time::Duration;

use cramrpc_wire::Region;

use crate::error::Result;

mod datagram;
mod memory;
mod stream;

pub use datagram::DatagramTransport;
pub use memory::MemoryTransport;
pub use stream::StreamTransport;

/// One request/response medium.
pub trait Transport: Send {
    /// Send one complete message, header included.
    fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Wait at most `timeout` for the next message and leave it in `region`.
    ///
    /// A timeout surfaces as an error for which
    /// [`PeerError::is_timeout`](crate::PeerError::is_timeout) is true.
    fn receive(&mut self, region: &mut Region, timeout: Duration) -> Result<()>;

    /// How many times one call is sent. Only lossy media resend.
    fn attempts(&self, _configured: u32) -> u32 {
        1
    }

    /// Name for diagnostics.
    fn name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }

    fn receive(&mut self, region: &mut Region, timeout: Duration) -> Result<()> {
        (**self).receive(region, timeout)
    }

    fn attempts(&self, configured: u32) -> u32 {
        (**self).attempts(configured)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
