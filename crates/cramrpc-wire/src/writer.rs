use std::io::{ErrorKind, Write};

use cramrpc_transport::IpcStream;

use crate::config::WireConfig;
use crate::error::{Result, WireError};
use crate::header::HEADER_SIZE;
use crate::reader::transport_to_wire_error;

/// Writes complete envelopes to any `Write` stream.
pub struct MessageWriter<T> {
    inner: T,
    config: WireConfig,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self { inner, config }
    }

    /// Write one encoded message (header included) and flush.
    pub fn write_message(&mut self, message: &[u8]) -> Result<()> {
        if message.len() < HEADER_SIZE {
            return Err(WireError::Truncated {
                len: message.len(),
                needed: HEADER_SIZE,
            });
        }
        let payload = message.len() - HEADER_SIZE;
        if payload > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: payload,
                max: self.config.max_payload_size,
            });
        }

        let mut offset = 0usize;
        while offset < message.len() {
            match self.inner.write(&message[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl MessageWriter<IpcStream> {
    /// Create a writer for `IpcStream` and apply the write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}
