//! Client half of the CRAM exchange.
//!
//! not-started → awaiting-challenge → ready → authenticated, with failed
//! as a terminal state. There is no silent retry: once failed, the client
//! must be recreated.

use std::fmt;
use std::sync::Arc;

use cramrpc_wire::ids::{
    PARAM_AUTH_CLIENT_CHALLENGE, PARAM_AUTH_CLIENT_RESPONSE, PARAM_AUTH_HASH_TYPE,
    PARAM_AUTH_SERVER_CHALLENGE, PARAM_AUTH_SERVER_RESPONSE,
};
use cramrpc_wire::Region;
use tracing::warn;

use crate::config::{MAX_CHALLENGE_SIZE, MIN_CHALLENGE_SIZE};
use crate::error::{AuthError, Result};
use crate::hash::HashAlgorithm;
use crate::session::Challenge;
use crate::sign::Signature;

/// Client-side handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotStarted,
    AwaitingChallenge,
    Ready,
    Authenticated,
    Failed,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientState::NotStarted => "not-started",
            ClientState::AwaitingChallenge => "awaiting-challenge",
            ClientState::Ready => "ready",
            ClientState::Authenticated => "authenticated",
            ClientState::Failed => "failed",
        }
    }
}

/// Client authenticator holding one shared secret.
pub struct CramClient {
    key: Arc<[u8]>,
    state: ClientState,
    session: u32,
    hash: HashAlgorithm,
    server_challenge: Option<Challenge>,
    // Challenge sent with the request awaiting its response.
    pending: Option<Challenge>,
}

impl CramClient {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: Arc::from(key.as_ref()),
            state: ClientState::NotStarted,
            session: 0,
            hash: HashAlgorithm::default(),
            server_challenge: None,
            pending: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Session id assigned by the server, 0 before the first reply.
    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn is_failed(&self) -> bool {
        self.state == ClientState::Failed
    }

    /// Ready to sign calls.
    pub fn can_sign(&self) -> bool {
        matches!(self.state, ClientState::Ready | ClientState::Authenticated)
    }

    /// Start the handshake. The begin request carries no auth parameters.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != ClientState::NotStarted {
            return Err(self.fail(AuthError::UnexpectedState(self.state.as_str())));
        }
        self.state = ClientState::AwaitingChallenge;
        Ok(())
    }

    /// Take the hash choice, first challenge and session id from the
    /// server's answer to the begin request.
    pub fn accept_challenge(&mut self, session: u32, response: &Region) -> Result<()> {
        if self.state != ClientState::AwaitingChallenge {
            return Err(self.fail(AuthError::UnexpectedState(self.state.as_str())));
        }
        let result = read_challenge(response);
        match result {
            Ok((hash, challenge)) if session != 0 => {
                self.hash = hash;
                self.server_challenge = Some(challenge);
                self.session = session;
                self.state = ClientState::Ready;
                Ok(())
            }
            Ok(_) => Err(self.fail(AuthError::UnknownSession(session))),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Append a fresh client challenge and the client response to `out`.
    ///
    /// Must be the last thing written before sending.
    pub fn sign(&mut self, out: &mut Region) -> Result<()> {
        if !self.can_sign() {
            return Err(self.fail(AuthError::UnexpectedState(self.state.as_str())));
        }
        let Some(server_challenge) = self.server_challenge.as_ref() else {
            return Err(self.fail(AuthError::MissingParam("AUTH_SERVER_CHALLENGE")));
        };
        let challenge = Challenge::random(server_challenge.len());
        Signature {
            hash: self.hash,
            key: &self.key,
            response_id: PARAM_AUTH_CLIENT_RESPONSE,
            first: challenge.as_bytes(),
            second: server_challenge.as_bytes(),
        }
        .append(out, PARAM_AUTH_CLIENT_CHALLENGE, challenge.as_bytes())?;
        self.pending = Some(challenge);
        Ok(())
    }

    /// Verify the server response to the last signed request and adopt the
    /// new server challenge.
    pub fn verify(&mut self, response: &Region) -> Result<()> {
        let result = self.verify_inner(response);
        match result {
            Ok(next) => {
                self.server_challenge = Some(next);
                self.pending = None;
                self.state = ClientState::Authenticated;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn verify_inner(&self, response: &Region) -> Result<Challenge> {
        if !self.can_sign() {
            return Err(AuthError::UnexpectedState(self.state.as_str()));
        }
        let (Some(server_challenge), Some(client_challenge)) =
            (self.server_challenge.as_ref(), self.pending.as_ref())
        else {
            return Err(AuthError::UnexpectedState("no signed request outstanding"));
        };

        let next = response
            .get(PARAM_AUTH_SERVER_CHALLENGE)
            .ok_or(AuthError::MissingParam("AUTH_SERVER_CHALLENGE"))?;
        if next.len() != server_challenge.len() {
            return Err(AuthError::ChallengeSize {
                expected: server_challenge.len(),
                got: next.len(),
            });
        }

        Signature {
            hash: self.hash,
            key: &self.key,
            response_id: PARAM_AUTH_SERVER_RESPONSE,
            first: server_challenge.as_bytes(),
            second: client_challenge.as_bytes(),
        }
        .verify(response)?;
        Ok(Challenge::from_bytes(next))
    }

    /// Give up: the client can no longer be used.
    pub fn fail(&mut self, err: AuthError) -> AuthError {
        if self.state != ClientState::Failed {
            warn!(state = self.state.as_str(), error = %err, "client authentication failed");
        }
        self.state = ClientState::Failed;
        err
    }

    /// Forget the session after logout; the key is kept.
    pub fn reset(&mut self) {
        self.state = ClientState::NotStarted;
        self.session = 0;
        self.server_challenge = None;
        self.pending = None;
    }
}

fn read_challenge(response: &Region) -> Result<(HashAlgorithm, Challenge)> {
    let code = match response.get(PARAM_AUTH_HASH_TYPE) {
        Some(raw) if raw.len() == 4 => response.get_u32(PARAM_AUTH_HASH_TYPE),
        _ => return Err(AuthError::MissingParam("AUTH_HASH_TYPE")),
    };
    let hash = HashAlgorithm::from_code(code).ok_or(AuthError::UnsupportedHash(code))?;
    let challenge = response
        .get(PARAM_AUTH_SERVER_CHALLENGE)
        .ok_or(AuthError::MissingParam("AUTH_SERVER_CHALLENGE"))?;
    if !(MIN_CHALLENGE_SIZE..=MAX_CHALLENGE_SIZE).contains(&challenge.len()) {
        return Err(AuthError::ChallengeSize {
            expected: MIN_CHALLENGE_SIZE,
            got: challenge.len(),
        });
    }
    Ok((hash, Challenge::from_bytes(challenge)))
}

impl fmt::Debug for CramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CramClient")
            .field("key", &format_args!("<redacted:{} bytes>", self.key.len()))
            .field("state", &self.state)
            .field("session", &self.session)
            .field("hash", &self.hash)
            .finish()
    }
}
