use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{AuthError, Result};
use crate::keys::KeyRecord;

/// Server-side progress of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Challenge sent, no signed request seen yet.
    Begin,
    /// First signed request verified; its response is pending.
    AuthenticatedOnce,
    /// Signed response sent; waiting for the next request.
    Authenticate,
    /// A later request verified; its response is pending.
    Checked,
    /// Terminal.
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Begin => "begin",
            SessionState::AuthenticatedOnce => "authenticated-once",
            SessionState::Authenticate => "authenticate",
            SessionState::Checked => "checked",
            SessionState::Failed => "failed",
        }
    }

    /// True once a key has been proven.
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            SessionState::AuthenticatedOnce | SessionState::Authenticate | SessionState::Checked
        )
    }
}

/// Random challenge bytes. Redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge(Vec<u8>);

impl Challenge {
    /// Fresh random bytes from the OS generator.
    pub fn random(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge(<redacted:{} bytes>)", self.0.len())
    }
}

/// One client's authentication record.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: u32,
    pub(crate) key: Option<Arc<KeyRecord>>,
    pub(crate) current: Challenge,
    pub(crate) previous: Option<Challenge>,
    pub(crate) client_challenge: Option<Challenge>,
    pub(crate) expected_sequence: u32,
    pub(crate) state: SessionState,
    pub(crate) last_used: Instant,
}

impl Session {
    pub(crate) fn new(id: u32, challenge: Challenge, expected_sequence: u32) -> Self {
        Self {
            id,
            key: None,
            current: challenge,
            previous: None,
            client_challenge: None,
            expected_sequence,
            state: SessionState::Begin,
            last_used: Instant::now(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The key bound by the first verified request.
    pub fn key(&self) -> Option<&Arc<KeyRecord>> {
        self.key.as_ref()
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    fn idle_limit(&self, auth_timeout: Duration, timeout: Duration) -> Duration {
        if self.state.is_authenticated() {
            timeout
        } else {
            auth_timeout
        }
    }
}

/// Shared handle to one session. Holding the lock means "in flight".
pub type SessionHandle = Arc<Mutex<Session>>;

/// All live sessions of one server, keyed by session id.
#[derive(Debug)]
pub struct SessionTable {
    sessions: RwLock<HashMap<u32, SessionHandle>>,
    max_sessions: usize,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Create a session under a fresh random id (never 0).
    pub(crate) fn create(
        &self,
        challenge: Challenge,
        expected_sequence: u32,
    ) -> Result<(u32, SessionHandle)> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.len() >= self.max_sessions {
            return Err(AuthError::TooManySessions(self.max_sessions));
        }
        let id = loop {
            let candidate = OsRng.next_u32();
            if candidate != 0 && !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let handle = Arc::new(Mutex::new(Session::new(id, challenge, expected_sequence)));
        sessions.insert(id, Arc::clone(&handle));
        debug!(session = id, live = sessions.len(), "session created");
        Ok((id, handle))
    }

    pub fn get(&self, id: u32) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: u32) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict idle sessions and return their ids.
    ///
    /// Sessions whose lock is held are in flight and always survive.
    pub fn reap(&self, auth_timeout: Duration, timeout: Duration, now: Instant) -> Vec<u32> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut evicted = Vec::new();
        sessions.retain(|id, handle| {
            let Ok(session) = handle.try_lock() else {
                return true;
            };
            let idle = now.saturating_duration_since(session.last_used);
            if idle > session.idle_limit(auth_timeout, timeout) {
                evicted.push(*id);
                false
            } else {
                true
            }
        });
        evicted
    }
}
