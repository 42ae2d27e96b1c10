use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// UDP socket for the datagram transport.
///
/// Datagrams may be lost, duplicated or reordered; the envelope sequence
/// numbers are what make retries safe, not this type.
#[derive(Debug)]
pub struct DatagramSocket {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl DatagramSocket {
    /// Bind a server-side socket.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let socket = UdpSocket::bind(&addr).map_err(|source| TransportError::BindAddr {
            addr: label,
            source,
        })?;
        info!(local_addr = ?socket.local_addr().ok(), "listening on udp");
        Ok(Self { socket, peer: None })
    }

    /// Create a client-side socket bound to an ephemeral port and aimed at `addr`.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let connect_err = |source| TransportError::ConnectAddr {
            addr: label.clone(),
            source,
        };
        let peer = addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "address resolved to nothing",
                ))
            })?;
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).map_err(connect_err)?;
        socket.connect(peer).map_err(connect_err)?;
        debug!(%peer, "udp socket aimed at peer");
        Ok(Self {
            socket,
            peer: Some(peer),
        })
    }

    /// Send one datagram to the connected peer.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        check_size(message.len())?;
        self.socket.send(message)?;
        Ok(())
    }

    /// Send one datagram to an explicit address (server replies).
    pub fn send_to(&self, message: &[u8], addr: SocketAddr) -> Result<()> {
        check_size(message.len())?;
        self.socket.send_to(message, addr)?;
        Ok(())
    }

    /// Receive one datagram, waiting at most `timeout`.
    ///
    /// Datagrams longer than `buf` are truncated by the OS; callers detect
    /// that through the envelope size field.
    pub fn recv_from(&self, buf: &mut [u8], timeout: Duration) -> Result<(usize, SocketAddr)> {
        self.socket.set_read_timeout(Some(non_zero(timeout)))?;
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(received),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(TransportError::Timeout)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Receive one datagram from the connected peer.
    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let (len, from) = self.recv_from(buf, timeout)?;
        match self.peer {
            Some(peer) if peer != from => Err(TransportError::UnexpectedPeer(from)),
            _ => Ok(len),
        }
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "udp"
    }
}

fn check_size(len: usize) -> Result<()> {
    if len > MAX_DATAGRAM {
        return Err(TransportError::MessageTooLarge {
            size: len,
            max: MAX_DATAGRAM,
        });
    }
    Ok(())
}

// A zero read timeout means "block forever" to the OS.
fn non_zero(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}
