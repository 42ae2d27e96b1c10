/// Errors that can occur while encoding, decoding or framing envelopes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The header carries the wrong magic number.
    #[error("invalid envelope magic {0:#010x}")]
    InvalidMagic(u32),

    /// Fewer bytes than a header were available.
    #[error("envelope truncated ({len} bytes, header needs {needed})")]
    Truncated { len: usize, needed: usize },

    /// The header size field disagrees with the bytes actually received.
    #[error("envelope size field says {declared} bytes, got {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    /// The message exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The parameter record chain does not fit the logical length.
    #[error("malformed parameter records")]
    MalformedParams,

    /// No room left in the output region for this parameter.
    #[error("parameter {id:#x} needs {needed} bytes, {available} available")]
    NoSpace {
        id: u32,
        needed: usize,
        available: usize,
    },

    /// The parameter exists with another size and is no longer resizable.
    #[error("parameter {id:#x} already written with {existing} bytes")]
    ParamLocked { id: u32, existing: usize },

    /// Supplied data disagrees with the declared size.
    #[error("parameter {id:#x} data is {data} bytes, declared {declared}")]
    DataSizeMismatch { id: u32, data: usize, declared: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

impl WireError {
    /// True when a stream read or write timed out rather than failed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            WireError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
