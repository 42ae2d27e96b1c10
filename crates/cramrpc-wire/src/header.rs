use bytes::{Buf, BufMut};

use crate::error::{Result, WireError};

/// Envelope header: six big-endian u32 fields = 24 bytes.
pub const HEADER_SIZE: usize = 24;

/// Magic number: "CRPC".
pub const MAGIC: u32 = 0x4352_5043;

/// Protocol major version. Must match exactly between peers.
pub const VERSION_MAJOR: u16 = 1;

/// Protocol minor version. Informational.
pub const VERSION_MINOR: u16 = 0;

/// Packed local protocol version.
pub const VERSION: u32 = pack_version(VERSION_MAJOR, VERSION_MINOR);

/// Client id sent by a client that has not been assigned one yet.
pub const CLIENT_ID_ASSIGN: u32 = u32::MAX;

/// Session id meaning "no session".
pub const NO_SESSION: u32 = 0;

/// Default ceiling for the parameter area of one message.
pub const DEFAULT_MAX_PAYLOAD: usize = 60 * 1024;

/// Pack `major.minor` into the header's version field.
pub const fn pack_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

/// Serial-number comparison over wrapping u32 sequences: true when `a`
/// comes after `b`.
pub fn sequence_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// The fixed header prefixed to every request and response.
///
/// Wire format:
/// ```text
/// ┌─────────┬──────────┬──────────┬──────────┬─────────┬───────────┐
/// │ magic   │ version  │ session  │ sequence │ size    │ client_id │
/// │ (4B BE) │ (4B BE)  │ (4B BE)  │ (4B BE)  │ (4B BE) │ (4B BE)   │
/// └─────────┴──────────┴──────────┴──────────┴─────────┴───────────┘
/// ```
/// `size` counts the header plus the parameter area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub session: u32,
    pub sequence: u32,
    pub size: u32,
    pub client_id: u32,
}

impl Header {
    /// A header carrying the local magic and version.
    pub fn new(session: u32, sequence: u32, client_id: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            session,
            sequence,
            size: HEADER_SIZE as u32,
            client_id,
        }
    }

    pub fn major(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn minor(&self) -> u16 {
        (self.version & 0xFFFF) as u16
    }

    /// True when the major version matches ours.
    pub fn version_compatible(&self) -> bool {
        self.major() == VERSION_MAJOR
    }

    /// Total message length the header declares.
    pub fn message_len(&self) -> usize {
        self.size as usize
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) {
        let mut out = &mut dst[..HEADER_SIZE];
        out.put_u32(self.magic);
        out.put_u32(self.version);
        out.put_u32(self.session);
        out.put_u32(self.sequence);
        out.put_u32(self.size);
        out.put_u32(self.client_id);
    }

    /// Parse the header fields without judging them.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(WireError::Truncated {
                len: src.len(),
                needed: HEADER_SIZE,
            });
        }
        let mut src = &src[..HEADER_SIZE];
        Ok(Self {
            magic: src.get_u32(),
            version: src.get_u32(),
            session: src.get_u32(),
            sequence: src.get_u32(),
            size: src.get_u32(),
            client_id: src.get_u32(),
        })
    }

    /// Parse a complete message and apply the structural envelope checks:
    /// header present, magic, and size field equal to the bytes received.
    pub fn check(message: &[u8]) -> Result<Self> {
        let header = Self::decode(message)?;
        if header.magic != MAGIC {
            return Err(WireError::InvalidMagic(header.magic));
        }
        if header.message_len() != message.len() {
            return Err(WireError::SizeMismatch {
                declared: header.message_len(),
                actual: message.len(),
            });
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_big_endian_and_decodes_back() {
        let header = Header {
            size: 40,
            ..Header::new(7, 0x0102_0304, CLIENT_ID_ASSIGN)
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);

        assert_eq!(&buf[..4], &[0x43, 0x52, 0x50, 0x43]);
        assert_eq!(&buf[12..16], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[20..24], &[0xFF; 4]);
        assert_eq!(Header::decode(&buf).unwrap(), header);
    }

    #[test]
    fn version_packing() {
        let header = Header {
            version: pack_version(3, 9),
            ..Header::new(0, 0, 0)
        };
        assert_eq!(header.major(), 3);
        assert_eq!(header.minor(), 9);
        assert!(!header.version_compatible());
        assert!(Header::new(0, 0, 0).version_compatible());
    }

    #[test]
    fn sequence_comparison_wraps() {
        assert!(sequence_newer(2, 1));
        assert!(!sequence_newer(1, 1));
        assert!(!sequence_newer(1, 2));
        assert!(sequence_newer(0, u32::MAX));
        assert!(sequence_newer(5, u32::MAX - 5));
    }

    #[test]
    fn check_rejects_short_message() {
        let err = Header::check(&[0x43, 0x52]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { len: 2, .. }));
    }

    #[test]
    fn check_rejects_bad_magic() {
        let mut buf = [0u8; HEADER_SIZE];
        Header {
            magic: 0xDEAD_BEEF,
            ..Header::new(0, 1, 0)
        }
        .encode(&mut buf);
        assert!(matches!(
            Header::check(&buf),
            Err(WireError::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn check_rejects_size_disagreement() {
        let mut buf = vec![0u8; HEADER_SIZE + 8];
        Header {
            size: (HEADER_SIZE + 4) as u32,
            ..Header::new(0, 1, 0)
        }
        .encode(&mut buf);
        assert!(matches!(
            Header::check(&buf),
            Err(WireError::SizeMismatch {
                declared: 28,
                actual: 32
            })
        ));
    }
}
