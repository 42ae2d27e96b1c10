//! Synchronous, single-outstanding client.
//!
//! `lock → fill → exec → read → unlock`: a [`CallGuard`] owns the client
//! for the duration of one call and releases it on drop.

use std::time::{Duration, Instant};

use cramrpc_auth::{ClientState, CramClient, HashAlgorithm};
use cramrpc_transport::Permit;
use cramrpc_wire::ids::{
    PARAM_AUTH_TYPE, PARAM_NEED_AUTH, PARAM_OBJECT, PARAM_PROCEDURE, PROC_AUTHENTICATE,
    PROC_GET_CAPABILITIES, PROC_LOGOUT,
};
use cramrpc_wire::{sequence_newer, Header, ParamBuffer, Region, Status, CLIENT_ID_ASSIGN};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::envelope::{check_envelope, finish_request, response_status, status_result};
use crate::error::{PeerError, Result};
use crate::transport::Transport;

/// What the server reported through get-capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub need_auth: bool,
    /// Hash algorithm the server signs with, when it requires authentication.
    pub hash: Option<HashAlgorithm>,
}

/// A connection to one server over one transport.
pub struct Client<T: Transport> {
    transport: T,
    config: ClientConfig,
    buf: ParamBuffer,
    auth: Option<CramClient>,
    sequence: u32,
    session: u32,
    client_id: u32,
    failed: bool,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let auth = config.key.as_deref().map(CramClient::new);
        Self {
            buf: ParamBuffer::new(config.max_payload),
            transport,
            config,
            auth,
            sequence: 0,
            session: 0,
            client_id: CLIENT_ID_ASSIGN,
            failed: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session id, 0 until authenticated.
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Client id assigned by the server, `CLIENT_ID_ASSIGN` until the
    /// first response.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// True once the client is unusable and must be recreated.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.as_ref().is_some_and(CramClient::can_sign)
    }

    /// Start a call. Authenticates first when a key is configured and
    /// no session exists yet.
    pub fn lock(&mut self) -> Result<CallGuard<'_, T>> {
        if self.failed {
            return Err(PeerError::ClientFailed);
        }
        if self
            .auth
            .as_ref()
            .is_some_and(|auth| auth.state() == ClientState::NotStarted)
        {
            self.authenticate()?;
        }
        let permit = match &self.config.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire(self.config.timeout)
                    .ok_or(PeerError::Timeout(self.config.timeout))?,
            ),
            None => None,
        };
        self.buf.reset();
        Ok(CallGuard {
            client: self,
            _permit: permit,
            executed: false,
        })
    }

    /// Probe whether the server requires authentication. Never signed.
    pub fn capabilities(&mut self) -> Result<Capabilities> {
        if self.failed {
            return Err(PeerError::ClientFailed);
        }
        self.buf.reset();
        self.buf
            .output_mut()
            .set_u32(PARAM_PROCEDURE, PROC_GET_CAPABILITIES)?;
        self.roundtrip(false, PROC_GET_CAPABILITIES, 0)?;

        let input = self.buf.input();
        let need_auth = input.get_u32(PARAM_NEED_AUTH) != 0;
        let hash = if need_auth {
            HashAlgorithm::from_code(input.get_u32(PARAM_AUTH_TYPE))
        } else {
            None
        };
        Ok(Capabilities { need_auth, hash })
    }

    /// Run the CRAM handshake: an unsigned begin, then one signed
    /// exchange that proves the key both ways. Any failure is terminal.
    pub fn authenticate(&mut self) -> Result<()> {
        if self.failed {
            return Err(PeerError::ClientFailed);
        }
        let Some(auth) = self.auth.as_mut() else {
            return Err(PeerError::InvalidConfig(
                "no key configured for authentication".to_string(),
            ));
        };
        if auth.can_sign() {
            return Ok(());
        }
        if let Err(err) = auth.begin() {
            return Err(self.fail(err.into()));
        }

        self.buf.reset();
        self.buf
            .output_mut()
            .set_u32(PARAM_PROCEDURE, PROC_AUTHENTICATE)?;
        let header = match self.roundtrip(false, PROC_AUTHENTICATE, 0) {
            Ok(header) => header,
            Err(err) => return Err(self.fail(err)),
        };
        self.session = header.session;
        let accepted = match self.auth.as_mut() {
            Some(auth) => auth.accept_challenge(header.session, self.buf.input()),
            None => return Err(PeerError::ClientFailed),
        };
        if let Err(err) = accepted {
            return Err(self.fail(err.into()));
        }

        self.buf.reset();
        self.buf
            .output_mut()
            .set_u32(PARAM_PROCEDURE, PROC_AUTHENTICATE)?;
        self.sign()?;
        if let Err(err) = self.roundtrip(true, PROC_AUTHENTICATE, 0) {
            return Err(self.fail(err));
        }
        info!(session = self.session, transport = self.transport.name(), "authenticated");
        Ok(())
    }

    /// End the session. The client cannot be used afterwards.
    pub fn logout(&mut self) -> Result<()> {
        if self.failed {
            return Err(PeerError::ClientFailed);
        }
        let result = if self.is_authenticated() {
            self.buf.reset();
            self.buf.output_mut().set_u32(PARAM_PROCEDURE, PROC_LOGOUT)?;
            self.sign()?;
            match self.roundtrip(true, PROC_LOGOUT, 0) {
                // Already gone, e.g. the first reply was lost and the
                // retry found no session.
                Ok(_) | Err(PeerError::NotAuthenticated) => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        };
        if let Some(auth) = self.auth.as_mut() {
            auth.reset();
        }
        self.session = 0;
        self.failed = true;
        debug!(transport = self.transport.name(), "client closed");
        result
    }

    /// Log out when authenticated and release the transport.
    pub fn close(mut self) -> Result<()> {
        if self.failed {
            return Ok(());
        }
        self.logout()
    }

    fn sign(&mut self) -> Result<()> {
        let signed = match self.auth.as_mut() {
            Some(auth) => auth.sign(self.buf.output_mut()),
            None => return Ok(()),
        };
        signed.map_err(|err| self.fail(err.into()))
    }

    fn fail(&mut self, err: PeerError) -> PeerError {
        if !self.failed {
            warn!(transport = self.transport.name(), error = %err, "client failed");
        }
        self.failed = true;
        err
    }

    // Send the output region and settle the response: envelope, sequence,
    // signature (when the request was signed) and status.
    fn roundtrip(&mut self, signed: bool, procedure: u32, object: u32) -> Result<Header> {
        let header = self.exchange()?;
        if self.client_id == CLIENT_ID_ASSIGN {
            self.client_id = header.client_id;
        }

        let status = match response_status(&header, self.buf.input()) {
            Ok(status) => status,
            Err(err) => return Err(self.fail(err)),
        };
        if signed && status.is_signed() {
            let verified = match self.auth.as_mut() {
                Some(auth) => auth.verify(self.buf.input()),
                None => Ok(()),
            };
            if let Err(err) = verified {
                return Err(self.fail(err.into()));
            }
        }
        if signed && status == Status::NotAuthenticated {
            // The server failed or forgot the session.
            return Err(self.fail(PeerError::NotAuthenticated));
        }
        status_result(&header, status, procedure, object)?;
        Ok(header)
    }

    fn exchange(&mut self) -> Result<Header> {
        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;
        finish_request(
            self.buf.output_mut(),
            self.session,
            sequence,
            self.client_id,
        );

        let attempts = self.transport.attempts(self.config.attempts).max(1);
        let per_attempt = self.config.timeout / attempts;
        for attempt in 1..=attempts {
            if let Err(err) = self.transport.send(self.buf.output().message()) {
                return Err(self.fail(err));
            }
            let deadline = Instant::now() + per_attempt;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match self.transport.receive(self.buf.input_mut(), remaining) {
                    Ok(()) => {}
                    Err(err) if err.is_timeout() => break,
                    Err(err) => return Err(self.fail(err)),
                }
                match check_envelope(self.buf.input(), sequence) {
                    Ok(header) => return Ok(header),
                    Err(PeerError::SequenceMismatch { got, .. })
                        if sequence_newer(sequence, got) =>
                    {
                        debug!(got, sequence, "discarding response to an earlier request");
                    }
                    Err(err) => return Err(self.fail(err)),
                }
            }
            if attempt < attempts {
                debug!(attempt, sequence, "no response, resending");
            }
        }
        Err(self.fail(PeerError::Timeout(self.config.timeout)))
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport.name())
            .field("sequence", &self.sequence)
            .field("session", &self.session)
            .field("client_id", &self.client_id)
            .field("auth", &self.auth)
            .field("failed", &self.failed)
            .finish()
    }
}

/// One call in progress. Dropping it unlocks the client.
pub struct CallGuard<'a, T: Transport> {
    client: &'a mut Client<T>,
    _permit: Option<Permit>,
    executed: bool,
}

impl<T: Transport> CallGuard<'_, T> {
    /// Request parameters to fill before [`CallGuard::exec`].
    pub fn params_mut(&mut self) -> &mut Region {
        self.client.buf.output_mut()
    }

    /// Call `procedure` on `object` (0 for none) and wait for the reply.
    pub fn exec(&mut self, procedure: u32, object: u32) -> Result<&Region> {
        if self.executed {
            return Err(PeerError::AlreadyExecuted);
        }
        self.executed = true;

        let client = &mut *self.client;
        let output = client.buf.output_mut();
        output.set_u32(PARAM_PROCEDURE, procedure)?;
        output.set_u32(PARAM_OBJECT, object)?;
        let signed = client.is_authenticated();
        if signed {
            client.sign()?;
        }
        let started = Instant::now();
        client.roundtrip(signed, procedure, object)?;
        debug!(
            procedure,
            object,
            elapsed_us = started.elapsed().as_micros() as u64,
            "call complete"
        );
        Ok(client.buf.input())
    }

    /// Response parameters of the executed call.
    pub fn reply(&self) -> &Region {
        self.client.buf.input()
    }

    /// Time budget of one call.
    pub fn timeout(&self) -> Duration {
        self.client.config.timeout
    }
}
