use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use cramrpc_transport::{DatagramSocket, TransportError};
use cramrpc_wire::Region;
use tracing::debug;

use super::Transport;
use crate::error::{PeerError, Result};

/// Lossy datagrams: the client resends the identical request on every
/// attempt and the server's replay cache answers duplicates.
#[derive(Debug)]
pub struct DatagramTransport {
    socket: DatagramSocket,
}

impl DatagramTransport {
    /// Bind an ephemeral local port and connect it to the server.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        Ok(Self {
            socket: DatagramSocket::connect(addr)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for DatagramTransport {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.socket.send(message)?;
        Ok(())
    }

    fn receive(&mut self, region: &mut Region, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PeerError::Timeout(timeout));
            }
            match self.socket.recv(region.receive_buf(), remaining) {
                Ok(len) => {
                    region.set_received(len)?;
                    return Ok(());
                }
                Err(TransportError::UnexpectedPeer(from)) => {
                    debug!(%from, "ignoring datagram from unexpected peer");
                }
                Err(err) if err.is_timeout() => return Err(PeerError::Timeout(timeout)),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn attempts(&self, configured: u32) -> u32 {
        configured.max(1)
    }

    fn name(&self) -> &'static str {
        "datagram"
    }
}
