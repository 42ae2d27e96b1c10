use std::net::ToSocketAddrs;
use std::time::Duration;

use cramrpc_transport::{IpcStream, TcpSocket};
use cramrpc_wire::{MessageReader, MessageWriter, Region, WireConfig, WireError};

#[cfg(unix)]
use cramrpc_transport::UnixDomainSocket;

use super::Transport;
use crate::error::{PeerError, Result};

/// Reliable byte stream: sends once and waits the whole timeout.
pub struct StreamTransport {
    reader: MessageReader<IpcStream>,
    writer: MessageWriter<IpcStream>,
    label: String,
}

impl StreamTransport {
    /// Wrap a connected stream.
    pub fn new(stream: IpcStream, max_payload: usize) -> Result<Self> {
        let config = WireConfig {
            max_payload_size: max_payload,
            ..WireConfig::default()
        };
        let label = stream.peer_label();
        let reader = MessageReader::with_config(stream.try_clone()?, config);
        let writer = MessageWriter::with_config(stream, config);
        Ok(Self {
            reader,
            writer,
            label,
        })
    }

    /// Connect to a server on a Unix domain socket.
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<std::path::Path>, max_payload: usize) -> Result<Self> {
        Self::new(UnixDomainSocket::connect(path)?, max_payload)
    }

    /// Connect to a server over TCP.
    pub fn connect_tcp(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        timeout: Duration,
        max_payload: usize,
    ) -> Result<Self> {
        Self::new(TcpSocket::connect(addr, timeout)?, max_payload)
    }

    /// Peer description for logs.
    pub fn peer(&self) -> &str {
        &self.label
    }
}

impl Transport for StreamTransport {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.writer.write_message(message)?;
        Ok(())
    }

    fn receive(&mut self, region: &mut Region, timeout: Duration) -> Result<()> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.reader.read_message(region) {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() => Err(PeerError::Timeout(timeout)),
            Err(WireError::ConnectionClosed) => Err(PeerError::Transport(
                cramrpc_transport::TransportError::Shutdown,
            )),
            Err(err) => Err(err.into()),
        }
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("peer", &self.label)
            .finish()
    }
}
