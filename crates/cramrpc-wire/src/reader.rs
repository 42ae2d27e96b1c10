use std::io::{ErrorKind, Read};

use cramrpc_transport::{IpcStream, TransportError};

use crate::config::WireConfig;
use crate::error::{Result, WireError};
use crate::header::{Header, HEADER_SIZE, MAGIC};
use crate::params::Region;

/// Reads complete envelopes from any `Read` stream.
///
/// The header's size field delimits each message, so no extra framing is
/// put on the wire. Messages are read straight into a [`Region`].
pub struct MessageReader<T> {
    inner: T,
    config: WireConfig,
}

impl<T: Read> MessageReader<T> {
    /// Create a new reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete message into `region` (blocking).
    ///
    /// Returns the message length. `Err(WireError::ConnectionClosed)` means
    /// EOF, either between messages or inside one.
    pub fn read_message(&mut self, region: &mut Region) -> Result<usize> {
        if region.header_size() != HEADER_SIZE {
            return Err(WireError::Truncated {
                len: region.header_size(),
                needed: HEADER_SIZE,
            });
        }

        let buf = region.receive_buf();
        self.fill(&mut buf[..HEADER_SIZE])?;
        let header = Header::decode(&buf[..HEADER_SIZE])?;
        if header.magic != MAGIC {
            return Err(WireError::InvalidMagic(header.magic));
        }

        let len = header.message_len();
        if len < HEADER_SIZE {
            return Err(WireError::Truncated {
                len,
                needed: HEADER_SIZE,
            });
        }
        let max = self.config.max_payload_size.min(buf.len() - HEADER_SIZE);
        if len - HEADER_SIZE > max {
            return Err(WireError::PayloadTooLarge {
                size: len - HEADER_SIZE,
                max,
            });
        }

        self.fill(&mut buf[HEADER_SIZE..len])?;
        region.set_received(len)?;
        Ok(len)
    }

    fn fill(&mut self, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match self.inner.read(dst) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => dst = &mut dst[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl MessageReader<IpcStream> {
    /// Create a reader for `IpcStream` and apply the read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_wire_error(err: TransportError) -> WireError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => WireError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            WireError::Io(source)
        }
        other => WireError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::writer::MessageWriter;

    fn encoded(sequence: u32, params: &[(u32, &[u8])]) -> Vec<u8> {
        let mut region = Region::new(HEADER_SIZE, 1024);
        for (id, data) in params {
            region.set_bytes(*id, data).unwrap();
        }
        let header = Header {
            size: region.message_len() as u32,
            ..Header::new(0, sequence, 0)
        };
        header.encode(region.header_mut());
        region.message().to_vec()
    }

    #[test]
    fn read_single_message() {
        let wire = encoded(1, &[(0x2000_0001, b"hello")]);
        let mut reader = MessageReader::new(Cursor::new(wire.clone()));
        let mut region = Region::new(HEADER_SIZE, 1024);

        let len = reader.read_message(&mut region).unwrap();
        assert_eq!(len, wire.len());
        assert_eq!(region.get(0x2000_0001), Some(&b"hello"[..]));
        assert_eq!(Header::decode(region.header()).unwrap().sequence, 1);
    }

    #[test]
    fn read_back_to_back_messages() {
        let mut wire = encoded(1, &[(0x2000_0001, b"one")]);
        wire.extend(encoded(2, &[]));
        wire.extend(encoded(3, &[(0x2000_0001, b"three")]));

        let mut reader = MessageReader::new(Cursor::new(wire));
        let mut region = Region::new(HEADER_SIZE, 1024);
        for expected in 1..=3 {
            reader.read_message(&mut region).unwrap();
            assert_eq!(Header::decode(region.header()).unwrap().sequence, expected);
        }
        assert_eq!(region.get_str(0x2000_0001), "");
        assert_eq!(region.get(0x2000_0001), Some(&b"three"[..]));
    }

    #[test]
    fn partial_reads_are_reassembled() {
        let wire = encoded(4, &[(0x2000_0001, b"slow")]);
        let mut reader = MessageReader::new(ByteByByteReader {
            bytes: wire,
            pos: 0,
        });
        let mut region = Region::new(HEADER_SIZE, 64);
        reader.read_message(&mut region).unwrap();
        assert_eq!(region.get(0x2000_0001), Some(&b"slow"[..]));
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = MessageReader::new(Cursor::new(Vec::<u8>::new()));
        let mut region = Region::new(HEADER_SIZE, 64);
        let err = reader.read_message(&mut region).unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_message() {
        let mut wire = encoded(1, &[(0x2000_0001, b"only-part")]);
        wire.truncate(wire.len() - 3);
        let mut reader = MessageReader::new(Cursor::new(wire));
        let mut region = Region::new(HEADER_SIZE, 64);
        let err = reader.read_message(&mut region).unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let mut wire = encoded(1, &[]);
        wire[0] = 0;
        let mut reader = MessageReader::new(Cursor::new(wire));
        let mut region = Region::new(HEADER_SIZE, 64);
        let err = reader.read_message(&mut region).unwrap_err();
        assert!(matches!(err, WireError::InvalidMagic(_)));
    }

    #[test]
    fn oversized_message_in_stream() {
        let wire = encoded(1, &[(0x2000_0001, &[0xAB; 100])]);
        let cfg = WireConfig {
            max_payload_size: 16,
            ..WireConfig::default()
        };
        let mut reader = MessageReader::with_config(Cursor::new(wire), cfg);
        let mut region = Region::new(HEADER_SIZE, 1024);
        let err = reader.read_message(&mut region).unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { max: 16, .. }));
    }

    #[test]
    fn interrupted_read_retries() {
        let wire = encoded(8, &[(0x2000_0001, b"ok")]);
        let mut reader = MessageReader::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire),
        });
        let mut region = Region::new(HEADER_SIZE, 64);
        reader.read_message(&mut region).unwrap();
        assert_eq!(region.get(0x2000_0001), Some(&b"ok"[..]));
    }

    #[test]
    fn roundtrip_over_ipc_stream_pair() {
        let (left, right) = IpcStream::pair().expect("stream pair");
        let mut writer = MessageWriter::new(left);
        let mut reader = MessageReader::with_config_ipc(
            right,
            WireConfig {
                read_timeout: Some(std::time::Duration::from_secs(5)),
                ..WireConfig::default()
            },
        )
        .expect("reader");

        let mut out = Region::new(HEADER_SIZE, 256);
        out.set_str(0x2000_0001, "ping").unwrap();
        Header {
            size: out.message_len() as u32,
            ..Header::new(0, 9, 0)
        }
        .encode(out.header_mut());
        writer.write_message(out.message()).unwrap();

        let mut input = Region::new(HEADER_SIZE, 256);
        reader.read_message(&mut input).unwrap();
        assert_eq!(input.get_str(0x2000_0001), "ping");
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
