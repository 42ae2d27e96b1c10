//! Server half of the CRAM exchange.
//!
//! Per session: begin → authenticated-once → authenticate ↔ checked, with
//! failed as a terminal state reachable from anywhere.

use std::time::Instant;

use cramrpc_wire::ids::{
    PARAM_AUTH_CLIENT_CHALLENGE, PARAM_AUTH_CLIENT_RESPONSE, PARAM_AUTH_HASH_TYPE,
    PARAM_AUTH_SERVER_CHALLENGE, PARAM_AUTH_SERVER_RESPONSE,
};
use cramrpc_wire::{sequence_newer, Region};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::keys::{KeyRecord, KeyRegistry};
use crate::session::{Challenge, Session, SessionHandle, SessionState, SessionTable};
use crate::sign::Signature;

/// Which stored challenge a request was verified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verified {
    /// A new request: verified against the current challenge.
    Fresh,
    /// A retransmission: verified against the previous challenge.
    Retry,
}

/// Server-side authenticator: key registry plus session table.
#[derive(Debug)]
pub struct CramServer {
    config: AuthConfig,
    keys: KeyRegistry,
    sessions: SessionTable,
}

impl CramServer {
    pub fn new(config: AuthConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sessions: SessionTable::new(config.max_sessions),
            keys: KeyRegistry::new(),
            config,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn add_key(&self, key: KeyRecord) {
        self.keys.add(key);
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn session(&self, id: u32) -> Option<SessionHandle> {
        self.sessions.get(id)
    }

    /// Open a session for an unsigned authenticate request with
    /// `sequence`, writing the hash choice and first challenge to `out`.
    ///
    /// Returns the new session id.
    pub fn begin(&self, sequence: u32, out: &mut Region) -> Result<u32> {
        let challenge = Challenge::random(self.config.challenge_size);
        out.set_u32(PARAM_AUTH_HASH_TYPE, self.config.hash.code())?;
        out.set_bytes(PARAM_AUTH_SERVER_CHALLENGE, challenge.as_bytes())?;
        let (id, _) = self
            .sessions
            .create(challenge, sequence.wrapping_add(1))?;
        Ok(id)
    }

    /// Verify the signature on `request`.
    ///
    /// A request newer than or equal to the expected sequence is checked
    /// against the current challenge, an older one against the previous.
    /// Any mismatch fails the session for good.
    pub fn check(&self, session: &mut Session, sequence: u32, request: &Region) -> Result<Verified> {
        if session.state == SessionState::Failed {
            return Err(AuthError::Failed);
        }
        session.touch();
        let result = self.verify(session, sequence, request);
        if let Err(err) = &result {
            warn!(session = session.id, error = %err, "authentication failed");
            session.fail();
        }
        result
    }

    /// Verify a retransmitted request against the previous challenge so a
    /// cached response may be released.
    ///
    /// Unlike [`CramServer::check`] a mismatch leaves the session intact:
    /// the response being released was already earned by the real peer.
    pub fn check_retry(&self, session: &mut Session, sequence: u32, request: &Region) -> Result<()> {
        if session.state == SessionState::Failed {
            return Err(AuthError::Failed);
        }
        if !sequence_newer(session.expected_sequence, sequence) {
            return Err(AuthError::UnexpectedState("retry of an unanswered request"));
        }
        match self.verify(session, sequence, request)? {
            Verified::Retry => Ok(()),
            Verified::Fresh => Err(AuthError::UnexpectedState("retry of an unanswered request")),
        }
    }

    fn verify(&self, session: &mut Session, sequence: u32, request: &Region) -> Result<Verified> {
        let fresh = !sequence_newer(session.expected_sequence, sequence);
        let expected = if fresh {
            &session.current
        } else {
            session.previous.as_ref().ok_or(AuthError::UnexpectedState(
                "retry before any signed response",
            ))?
        };

        let client_challenge = request
            .get(PARAM_AUTH_CLIENT_CHALLENGE)
            .ok_or(AuthError::MissingParam("AUTH_CLIENT_CHALLENGE"))?;
        if client_challenge.len() != self.config.challenge_size {
            return Err(AuthError::ChallengeSize {
                expected: self.config.challenge_size,
                got: client_challenge.len(),
            });
        }

        let check = |key: &[u8]| {
            Signature {
                hash: self.config.hash,
                key,
                response_id: PARAM_AUTH_CLIENT_RESPONSE,
                first: client_challenge,
                second: expected.as_bytes(),
            }
            .verify(request)
        };

        match session.key.clone() {
            Some(key) => check(key.secret())?,
            None => {
                // Discover the key: first registered key whose response matches.
                let key = self
                    .keys
                    .find(|key| check(key.secret()).is_ok())
                    .ok_or(AuthError::NoMatchingKey)?;
                debug!(session = session.id, "session bound to key");
                session.key = Some(key);
            }
        }

        if !fresh {
            return Ok(Verified::Retry);
        }
        session.client_challenge = Some(Challenge::from_bytes(client_challenge));
        session.expected_sequence = sequence.wrapping_add(1);
        session.state = match session.state {
            SessionState::Begin => SessionState::AuthenticatedOnce,
            _ => SessionState::Checked,
        };
        Ok(Verified::Fresh)
    }

    /// Sign the response to the request just verified and rotate the
    /// challenges: current becomes previous, a new current is sent along.
    pub fn sign(&self, session: &mut Session, out: &mut Region) -> Result<()> {
        if !matches!(
            session.state,
            SessionState::AuthenticatedOnce | SessionState::Checked
        ) {
            return Err(AuthError::UnexpectedState(session.state.as_str()));
        }
        let key = session
            .key
            .clone()
            .ok_or(AuthError::UnexpectedState(session.state.as_str()))?;
        let client_challenge = session
            .client_challenge
            .take()
            .ok_or(AuthError::MissingParam("AUTH_CLIENT_CHALLENGE"))?;
        let next = Challenge::random(self.config.challenge_size);

        Signature {
            hash: self.config.hash,
            key: key.secret(),
            response_id: PARAM_AUTH_SERVER_RESPONSE,
            first: session.current.as_bytes(),
            second: client_challenge.as_bytes(),
        }
        .append(out, PARAM_AUTH_SERVER_CHALLENGE, next.as_bytes())?;

        session.previous = Some(std::mem::replace(&mut session.current, next));
        session.state = SessionState::Authenticate;
        session.touch();
        Ok(())
    }

    /// Drop a session after logout.
    pub fn logout(&self, id: u32) -> bool {
        let removed = self.sessions.remove(id);
        if removed {
            debug!(session = id, "session logged out");
        }
        removed
    }

    /// Evict idle sessions per the configured timeouts.
    pub fn reap(&self, now: Instant) -> Vec<u32> {
        let evicted = self
            .sessions
            .reap(self.config.auth_timeout, self.config.timeout, now);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "reaped idle sessions");
        }
        evicted
    }
}
