//! Request execution: envelope checks, duplicate suppression,
//! authentication, procedure and object resolution, access control.
//!
//! [`Dispatcher::execute`] is the single entry point every transport
//! worker calls with the request loaded into the input region. The
//! response, when there is one, is left in the output region with its
//! header already written.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, TryLockError};
use std::time::Instant;

use bytes::Bytes;
use cramrpc_auth::{CramServer, KeyRecord, UserData, Verified};
use cramrpc_wire::ids::{
    is_reserved, procedure_name, PARAM_AUTH_CLIENT_RESPONSE, PARAM_AUTH_TYPE, PARAM_NEED_AUTH,
    PARAM_OBJECT, PARAM_PROCEDURE, PROC_AUTHENTICATE, PROC_GET_CAPABILITIES, PROC_LOGOUT,
};
use cramrpc_wire::{Header, ParamBuffer, Region, Status, CLIENT_ID_ASSIGN};
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::envelope::{finish_response, request_header, write_status};
use crate::error::{PeerError, Result};
use crate::replay::{Identity, Replay, ReplayCache};

/// A registered procedure. Reads the call's input, writes its output and
/// returns the status to report.
pub type Procedure = Arc<dyn Fn(&mut Call<'_>) -> Status + Send + Sync>;

/// A registered object instance.
pub type Object = Arc<dyn Any + Send + Sync>;

/// Access-control hook: `(procedure, object, key user data) -> allowed`.
pub type Acl = Arc<dyn Fn(u32, u32, Option<&UserData>) -> bool + Send + Sync>;

/// What the worker should do after [`Dispatcher::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Send the output region.
    Ok,
    /// Send nothing; the request was malformed, stale or refused silently.
    Fail,
    /// Send the output region, then close the connection.
    Close,
}

/// One procedure invocation as seen by its handler.
pub struct Call<'a> {
    procedure: u32,
    object: u32,
    instance: Option<&'a Object>,
    user_data: Option<&'a UserData>,
    session: u32,
    input: &'a Region,
    output: &'a mut Region,
}

impl<'a> Call<'a> {
    pub fn procedure(&self) -> u32 {
        self.procedure
    }

    /// Object id, 0 when the call addresses no object.
    pub fn object(&self) -> u32 {
        self.object
    }

    /// The object instance, if one is addressed and has type `T`.
    pub fn instance<T: Any>(&self) -> Option<&T> {
        self.instance.and_then(|object| object.downcast_ref::<T>())
    }

    /// User data of the key the session authenticated with.
    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data
    }

    /// Session id, 0 on servers without authentication.
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Request parameters.
    pub fn input(&self) -> &Region {
        self.input
    }

    /// Response parameters. Reserved ids are written by the dispatcher.
    pub fn output(&mut self) -> &mut Region {
        self.output
    }
}

impl fmt::Debug for Call<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("procedure", &self.procedure)
            .field("object", &self.object)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

// Per-branch result before it becomes an `Outcome`. Only `Signed`
// replies are cached on a server with authentication.
enum Step {
    Reply,
    Signed,
    Close,
    Drop,
}

/// The dispatch table plus everything needed to judge a request.
pub struct Dispatcher {
    auth: Option<CramServer>,
    procedures: RwLock<HashMap<u32, Procedure>>,
    objects: RwLock<HashMap<u32, Object>>,
    acl: RwLock<Option<Acl>>,
    replay: ReplayCache,
    next_client_id: AtomicU32,
}

impl Dispatcher {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let auth = config.auth.clone().map(CramServer::new).transpose()?;
        Ok(Self {
            auth,
            procedures: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            acl: RwLock::new(None),
            replay: ReplayCache::new(),
            next_client_id: AtomicU32::new(1),
        })
    }

    /// Authenticator, when the server requires authentication.
    pub fn auth(&self) -> Option<&CramServer> {
        self.auth.as_ref()
    }

    pub fn replay(&self) -> &ReplayCache {
        &self.replay
    }

    /// Register a procedure. Ids below the user range belong to the protocol.
    pub fn register_procedure(&self, id: u32, procedure: Procedure) -> Result<()> {
        if is_reserved(id) {
            return Err(PeerError::InvalidConfig(format!(
                "procedure id {id:#x} is reserved"
            )));
        }
        self.procedures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, procedure);
        Ok(())
    }

    /// Register an object instance. Id 0 means "no object".
    pub fn register_object(&self, id: u32, object: Object) -> Result<()> {
        if id == 0 {
            return Err(PeerError::InvalidConfig(
                "object id 0 is reserved for calls without an object".to_string(),
            ));
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, object);
        Ok(())
    }

    pub fn unregister_procedure(&self, id: u32) -> bool {
        self.procedures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn unregister_object(&self, id: u32) -> bool {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Install or replace the access-control hook.
    pub fn set_acl(&self, acl: Option<Acl>) {
        *self.acl.write().unwrap_or_else(PoisonError::into_inner) = acl;
    }

    /// Register a key. Fails on servers without authentication.
    pub fn add_key(&self, key: KeyRecord) -> Result<()> {
        let auth = self.auth.as_ref().ok_or_else(|| {
            PeerError::InvalidConfig("keys need an authentication config".to_string())
        })?;
        auth.add_key(key);
        Ok(())
    }

    /// Evict idle sessions and replay entries.
    pub fn reap(&self, idle: std::time::Duration, now: Instant) {
        if let Some(auth) = &self.auth {
            auth.reap(now);
        }
        self.replay.reap(idle, now);
    }

    /// Handle the request in `buf`'s input region.
    pub fn execute(&self, buf: &mut ParamBuffer, identity: Identity) -> Outcome {
        let header = match request_header(buf.input()) {
            Ok(header) => header,
            Err(err) => {
                warn!(?identity, error = %err, "dropping malformed request");
                return Outcome::Fail;
            }
        };
        let identity = match identity {
            Identity::Address(_) if header.client_id != CLIENT_ID_ASSIGN => {
                if self.auth.is_some() && header.session != 0 {
                    Identity::Session {
                        client: header.client_id,
                        session: header.session,
                    }
                } else {
                    Identity::Client(header.client_id)
                }
            }
            other => other,
        };

        let (input, output) = buf.split_mut();
        output.clear();

        if !header.version_compatible() {
            debug!(remote = header.version, "protocol version mismatch");
            write_status(output, Status::VersionMismatch);
            finish_response(output, header.session, header.sequence, header.client_id);
            return Outcome::Ok;
        }

        match self.replay.check(&identity, header.sequence) {
            Replay::Execute => {}
            Replay::Stale => {
                debug!(?identity, sequence = header.sequence, "dropping stale request");
                return Outcome::Fail;
            }
            Replay::Cached(reply) => return self.release_cached(&header, input, output, reply),
        }

        let client_id = self.client_id(header.client_id);
        let mut session = header.session;
        let procedure = input.get_u32(PARAM_PROCEDURE);
        debug!(
            ?identity,
            sequence = header.sequence,
            procedure = procedure_name(procedure),
            "executing request"
        );

        let step = match procedure {
            PROC_GET_CAPABILITIES => self.capabilities(output),
            PROC_AUTHENTICATE => self.authenticate(&header, input, output, &mut session),
            PROC_LOGOUT => self.logout(&header, &identity, input, output),
            _ => self.call(&header, procedure, input, output),
        };

        match step {
            Step::Drop => {
                self.replay.abandon(&identity, header.sequence);
                Outcome::Fail
            }
            Step::Reply if self.auth.is_some() => {
                // Unverified: must not advance the sequence for anyone.
                finish_response(output, session, header.sequence, client_id);
                self.replay.abandon(&identity, header.sequence);
                Outcome::Ok
            }
            Step::Reply | Step::Signed => {
                finish_response(output, session, header.sequence, client_id);
                self.replay.store(
                    &identity,
                    header.sequence,
                    Bytes::copy_from_slice(output.message()),
                );
                Outcome::Ok
            }
            Step::Close => {
                finish_response(output, session, header.sequence, client_id);
                Outcome::Close
            }
        }
    }

    fn client_id(&self, requested: u32) -> u32 {
        if requested != CLIENT_ID_ASSIGN {
            return requested;
        }
        loop {
            let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            if id != CLIENT_ID_ASSIGN {
                return id;
            }
        }
    }

    // A retransmission of the last executed request. With authentication
    // the retry must verify against the retained previous challenge
    // before the old reply is released. A bad retry is only dropped.
    fn release_cached(
        &self,
        header: &Header,
        input: &Region,
        output: &mut Region,
        reply: Bytes,
    ) -> Outcome {
        if let Some(auth) = &self.auth {
            let Some(handle) = auth.session(header.session) else {
                debug!(session = header.session, "retry for unknown session");
                return Outcome::Fail;
            };
            let mut session = match handle.try_lock() {
                Ok(session) => session,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    warn!(session = header.session, "session busy, dropping retry");
                    return Outcome::Fail;
                }
            };
            if let Err(err) = auth.check_retry(&mut session, header.sequence, input) {
                debug!(session = header.session, error = %err, "dropping unverified retry");
                return Outcome::Fail;
            }
        }
        match output.load(&reply) {
            Ok(()) => {
                debug!(sequence = header.sequence, "answering retry from cache");
                Outcome::Ok
            }
            Err(err) => {
                warn!(error = %err, "cached reply no longer fits");
                Outcome::Fail
            }
        }
    }

    fn capabilities(&self, output: &mut Region) -> Step {
        let need_auth = self.auth.is_some();
        let filled = output
            .set_u32(PARAM_NEED_AUTH, u32::from(need_auth))
            .and_then(|()| match &self.auth {
                Some(auth) => output.set_u32(PARAM_AUTH_TYPE, auth.config().hash.code()),
                None => Ok(()),
            });
        let status = if filled.is_ok() {
            Status::Ok
        } else {
            Status::Fail
        };
        write_status(output, status);
        Step::Reply
    }

    fn authenticate(
        &self,
        header: &Header,
        input: &Region,
        output: &mut Region,
        session: &mut u32,
    ) -> Step {
        let Some(auth) = &self.auth else {
            write_status(output, Status::AuthNotSupported);
            return Step::Reply;
        };
        if !input.contains(PARAM_AUTH_CLIENT_RESPONSE) {
            // First leg: open a session and hand out the first challenge.
            return match auth.begin(header.sequence, output) {
                Ok(id) => {
                    *session = id;
                    write_status(output, Status::Ok);
                    Step::Reply
                }
                Err(err) => {
                    warn!(error = %err, "could not open session");
                    output.clear();
                    write_status(output, Status::Fail);
                    Step::Reply
                }
            };
        }
        self.with_session(auth, header, input, output, |_, _| Status::Ok)
    }

    fn logout(
        &self,
        header: &Header,
        identity: &Identity,
        input: &Region,
        output: &mut Region,
    ) -> Step {
        let Some(auth) = &self.auth else {
            write_status(output, Status::Ok);
            return Step::Close;
        };
        if !input.contains(PARAM_AUTH_CLIENT_RESPONSE) {
            write_status(output, Status::NotAuthenticated);
            return Step::Reply;
        }
        match self.with_session(auth, header, input, output, |_, _| Status::Ok) {
            Step::Signed => {
                auth.logout(header.session);
                self.replay.forget(identity);
                Step::Close
            }
            other => other,
        }
    }

    fn call(&self, header: &Header, procedure: u32, input: &Region, output: &mut Region) -> Step {
        let object = input.get_u32(PARAM_OBJECT);
        match &self.auth {
            Some(auth) => {
                if !input.contains(PARAM_AUTH_CLIENT_RESPONSE) {
                    debug!(procedure, "unsigned call on authenticated server");
                    write_status(output, Status::NotAuthenticated);
                    return Step::Reply;
                }
                self.with_session(auth, header, input, output, |user_data, output| {
                    self.invoke(procedure, object, user_data, header.session, input, output)
                })
            }
            None => {
                let status = self.invoke(procedure, object, None, header.session, input, output);
                write_status(output, status);
                Step::Reply
            }
        }
    }

    // Verify, run `body`, set the status it returns and sign. A request
    // that fails verification gets an unsigned NOT_AUTHENTICATED.
    fn with_session<F>(
        &self,
        auth: &CramServer,
        header: &Header,
        input: &Region,
        output: &mut Region,
        body: F,
    ) -> Step
    where
        F: FnOnce(Option<&UserData>, &mut Region) -> Status,
    {
        let Some(handle) = auth.session(header.session) else {
            debug!(session = header.session, "unknown session");
            write_status(output, Status::NotAuthenticated);
            return Step::Reply;
        };
        let mut session = match handle.try_lock() {
            Ok(session) => session,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!(session = header.session, "session busy, dropping request");
                return Step::Drop;
            }
        };

        match auth.check(&mut session, header.sequence, input) {
            Ok(Verified::Fresh) => {}
            Ok(Verified::Retry) => {
                debug!(session = header.session, "retry without a cached reply");
                return Step::Drop;
            }
            Err(_) => {
                write_status(output, Status::NotAuthenticated);
                return Step::Reply;
            }
        }

        let user_data = session.key().and_then(|key| key.user_data()).cloned();
        let status = body(user_data.as_ref(), output);
        write_status(output, status);
        match auth.sign(&mut session, output) {
            Ok(()) => Step::Signed,
            Err(err) => {
                warn!(session = header.session, error = %err, "could not sign response");
                Step::Drop
            }
        }
    }

    fn invoke(
        &self,
        procedure: u32,
        object: u32,
        user_data: Option<&UserData>,
        session: u32,
        input: &Region,
        output: &mut Region,
    ) -> Status {
        let handler = self
            .procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&procedure)
            .cloned();
        let Some(handler) = handler else {
            return Status::NoProc;
        };

        let instance = if object == 0 {
            None
        } else {
            let found = self
                .objects
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&object)
                .cloned();
            match found {
                Some(instance) => Some(instance),
                None => return Status::NoObj,
            }
        };

        let acl = self
            .acl
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(acl) = acl {
            if !acl(procedure, object, user_data) {
                debug!(procedure, object, "access denied");
                return Status::AccessDenied;
            }
        }

        let mut call = Call {
            procedure,
            object,
            instance: instance.as_ref(),
            user_data,
            session,
            input,
            output,
        };
        handler(&mut call)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let procedures = self
            .procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let objects = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Dispatcher")
            .field("auth", &self.auth)
            .field("procedures", &procedures)
            .field("objects", &objects)
            .field("replay_entries", &self.replay.len())
            .finish()
    }
}
