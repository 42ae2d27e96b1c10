use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// TCP listener for the stream transport.
#[derive(Debug)]
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `addr` (e.g. `127.0.0.1:0`).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let bind_err = |source| TransportError::BindAddr {
            addr: label.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept one connection, waiting at most `timeout`.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<IpcStream> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    debug!(%peer, "accepted tcp connection");
                    return Ok(IpcStream::from_tcp(stream));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// Connect to a listening TCP endpoint, giving up after `timeout`.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug, timeout: Duration) -> Result<IpcStream> {
        let label = format!("{addr:?}");
        let connect_err = |source| TransportError::ConnectAddr {
            addr: label.clone(),
            source,
        };
        let mut last_err = None;
        for candidate in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    debug!(peer = %candidate, "connected over tcp");
                    return Ok(IpcStream::from_tcp(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(connect_err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing")
        })))
    }

    /// The bound local address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn loopback_connect_and_exchange() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr();

        let client = std::thread::spawn(move || {
            let mut stream = TcpSocket::connect(addr, Duration::from_secs(2)).unwrap();
            stream.write_all(b"tcp!").unwrap();
        });

        let mut server = listener.accept_timeout(Duration::from_secs(5)).unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"tcp!");
        client.join().unwrap();
    }

    #[test]
    fn accept_times_out() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let err = listener
            .accept_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
