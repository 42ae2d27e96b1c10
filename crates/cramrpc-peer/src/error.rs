use cramrpc_wire::Status;

/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cramrpc_transport::TransportError),

    /// Envelope or parameter encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] cramrpc_wire::WireError),

    /// Authentication failed; the client must be recreated.
    #[error("authentication error: {0}")]
    Auth(#[from] cramrpc_auth::AuthError),

    /// The response answers another request.
    #[error("response sequence {got} does not match request {expected}")]
    SequenceMismatch { expected: u32, got: u32 },

    /// The peers speak different major protocol versions.
    #[error("protocol version mismatch (local {local:#010x}, remote {remote:#010x})")]
    VersionMismatch { local: u32, remote: u32 },

    /// The server has no authentication configured.
    #[error("server does not support authentication")]
    AuthNotSupported,

    /// The server requires authentication for this call.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The access-control callback refused the call.
    #[error("access denied")]
    AccessDenied,

    /// No procedure with this id is registered.
    #[error("no procedure {0:#x}")]
    NoProc(u32),

    /// No object with this id is registered.
    #[error("no object {0:#x}")]
    NoObj(u32),

    /// The procedure reported failure.
    #[error("procedure {0:#x} failed")]
    CallFailed(u32),

    /// A signed status arrived without a valid signature.
    #[error("response to an authenticated call is not signed")]
    Unsigned,

    /// No valid response within the call timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The client failed earlier or was closed and must be recreated.
    #[error("client has failed and must be recreated")]
    ClientFailed,

    /// The call guard was already executed.
    #[error("call already executed; lock again for a new call")]
    AlreadyExecuted,

    /// The configuration is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Graceful shutdown failed.
    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),
}

impl PeerError {
    /// Map a non-OK wire status to its error.
    pub fn from_status(status: Status, procedure: u32, object: u32) -> Option<Self> {
        match status {
            Status::Ok => None,
            Status::Fail => Some(PeerError::CallFailed(procedure)),
            Status::VersionMismatch => Some(PeerError::VersionMismatch {
                local: cramrpc_wire::VERSION,
                remote: 0,
            }),
            Status::AuthNotSupported => Some(PeerError::AuthNotSupported),
            Status::NotAuthenticated => Some(PeerError::NotAuthenticated),
            Status::AccessDenied => Some(PeerError::AccessDenied),
            Status::NoProc => Some(PeerError::NoProc(procedure)),
            Status::NoObj => Some(PeerError::NoObj(object)),
        }
    }

    /// True when nothing arrived in time.
    pub fn is_timeout(&self) -> bool {
        match self {
            PeerError::Timeout(_) => true,
            PeerError::Transport(err) => err.is_timeout(),
            PeerError::Wire(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Protocol statuses carried in a well-formed response; the client
    /// stays usable after these.
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            PeerError::VersionMismatch { .. }
                | PeerError::AuthNotSupported
                | PeerError::NotAuthenticated
                | PeerError::AccessDenied
                | PeerError::NoProc(_)
                | PeerError::NoObj(_)
                | PeerError::CallFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
