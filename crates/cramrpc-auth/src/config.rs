use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::hash::HashAlgorithm;

/// Smallest accepted challenge length.
pub const MIN_CHALLENGE_SIZE: usize = 8;

/// Largest accepted challenge length.
pub const MAX_CHALLENGE_SIZE: usize = 1024;

/// Server-side authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Keyed hash offered to clients.
    pub hash: HashAlgorithm,
    /// Length of every server challenge, in bytes.
    pub challenge_size: usize,
    /// Idle limit for sessions that have not finished authenticating.
    pub auth_timeout: Duration,
    /// Idle limit for authenticated sessions.
    pub timeout: Duration,
    /// Upper bound on live sessions.
    pub max_sessions: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::HmacSha256,
            challenge_size: 32,
            auth_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            max_sessions: 4096,
        }
    }
}

impl AuthConfig {
    /// Reject values outside the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHALLENGE_SIZE..=MAX_CHALLENGE_SIZE).contains(&self.challenge_size) {
            return Err(AuthError::InvalidConfig(format!(
                "challenge_size {} outside {MIN_CHALLENGE_SIZE}..={MAX_CHALLENGE_SIZE}",
                self.challenge_size
            )));
        }
        if self.max_sessions == 0 {
            return Err(AuthError::InvalidConfig(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.auth_timeout.is_zero() || self.timeout.is_zero() {
            return Err(AuthError::InvalidConfig(
                "session timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
