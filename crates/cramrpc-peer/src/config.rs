use std::fmt;
use std::time::Duration;

use cramrpc_auth::AuthConfig;
use cramrpc_transport::{Permit, Semaphore};
use cramrpc_wire::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads per served transport.
    pub workers: usize,
    /// How long a worker blocks waiting for work before checking for shutdown.
    pub poll_interval: Duration,
    /// Cadence of the session and replay-cache sweep.
    pub reaper_interval: Duration,
    /// Idle time after which a stream connection is closed and a cached
    /// reply is forgotten.
    pub idle_timeout: Duration,
    /// Largest parameter area accepted or produced.
    pub max_payload: usize,
    /// Authentication; `None` serves without it.
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
            reaper_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(300),
            max_payload: DEFAULT_MAX_PAYLOAD,
            auth: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PeerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() || self.reaper_interval.is_zero() {
            return Err(PeerError::InvalidConfig(
                "poll and reaper intervals must be non-zero".to_string(),
            ));
        }
        if let Some(auth) = &self.auth {
            auth.validate()?;
        }
        Ok(())
    }
}

/// Client settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Budget for one call, shared across all attempts.
    pub timeout: Duration,
    /// Sends per call on lossy transports.
    pub attempts: u32,
    /// Largest parameter area accepted or produced.
    pub max_payload: usize,
    /// Shared secret; when set the client authenticates before its first call.
    #[serde(skip)]
    pub key: Option<Vec<u8>>,
    /// Process-wide bound on concurrent calls, shared between clients.
    #[serde(skip)]
    pub limiter: Option<CallLimiter>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 3,
            max_payload: DEFAULT_MAX_PAYLOAD,
            key: None,
            limiter: None,
        }
    }
}

impl ClientConfig {
    pub fn with_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.key = Some(key.as_ref().to_vec());
        self
    }

    pub fn with_limiter(mut self, limiter: CallLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ClientConfig");
        dbg.field("timeout", &self.timeout)
            .field("attempts", &self.attempts)
            .field("max_payload", &self.max_payload);
        if let Some(key) = &self.key {
            dbg.field("key", &format_args!("<redacted:{} bytes>", key.len()));
        } else {
            dbg.field("key", &Option::<Vec<u8>>::None);
        }
        dbg.field("limiter", &self.limiter).finish()
    }
}

/// Counting token source bounding concurrent calls. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CallLimiter {
    tokens: Semaphore,
}

impl CallLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            tokens: Semaphore::new(limit),
        }
    }

    /// Take a token, waiting at most `timeout`.
    pub fn acquire(&self, timeout: Duration) -> Option<Permit> {
        self.tokens.acquire_timeout(timeout)
    }

    pub fn available(&self) -> usize {
        self.tokens.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_validate() {
        ServerConfig::default().validate().expect("defaults");
        let cfg = ServerConfig {
            workers: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PeerError::InvalidConfig(_))));
    }

    #[test]
    fn server_config_rejects_bad_auth() {
        let cfg = ServerConfig {
            auth: Some(AuthConfig {
                challenge_size: 2,
                ..AuthConfig::default()
            }),
            ..ServerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PeerError::Auth(_))));
    }

    #[test]
    fn client_config_debug_redacts_key() {
        let cfg = ClientConfig::default().with_key("hunter2");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted:7 bytes>"));
    }

    #[test]
    fn client_config_skips_secrets_when_serialized() {
        let cfg = ClientConfig::default().with_key("hunter2");
        let json = serde_json::to_string(&cfg).expect("serialize");
        assert!(!json.contains("key"));
    }

    #[test]
    fn limiter_tokens_return_on_drop() {
        let limiter = CallLimiter::new(1);
        let permit = limiter.acquire(Duration::from_millis(5)).expect("token");
        assert!(limiter.acquire(Duration::from_millis(5)).is_none());
        drop(permit);
        assert_eq!(limiter.available(), 1);
    }
}
