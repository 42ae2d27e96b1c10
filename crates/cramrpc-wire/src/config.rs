use std::time::Duration;

use crate::header::DEFAULT_MAX_PAYLOAD;

/// Configuration for stream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireConfig {
    /// Largest parameter area accepted or sent, in bytes.
    pub max_payload_size: usize,
    /// Socket read timeout applied by [`crate::MessageReader::with_config_ipc`].
    pub read_timeout: Option<Duration>,
    /// Socket write timeout applied by [`crate::MessageWriter::with_config_ipc`].
    pub write_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
