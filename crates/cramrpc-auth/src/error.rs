/// Errors that can occur during CRAM authentication.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The configuration is out of range.
    #[error("invalid auth config: {0}")]
    InvalidConfig(String),

    /// The peer announced a hash algorithm we do not implement.
    #[error("unsupported hash algorithm {0}")]
    UnsupportedHash(u32),

    /// A challenge has the wrong length.
    #[error("challenge is {got} bytes, expected {expected}")]
    ChallengeSize { expected: usize, got: usize },

    /// A parameter required by the handshake is missing or malformed.
    #[error("missing or malformed auth parameter {0}")]
    MissingParam(&'static str),

    /// The signed-size field does not cover the message.
    #[error("signed size {signed} does not match message length {len}")]
    SignedSize { signed: usize, len: usize },

    /// The keyed hash did not match.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// No registered key produced the client's response.
    #[error("no registered key matches")]
    NoMatchingKey,

    /// The request names a session the server does not know.
    #[error("unknown session {0:#010x}")]
    UnknownSession(u32),

    /// The session or client already failed and must be recreated.
    #[error("authentication already failed")]
    Failed,

    /// The handshake step does not fit the current state.
    #[error("unexpected handshake step in state {0}")]
    UnexpectedState(&'static str),

    /// The session table is full.
    #[error("session limit of {0} reached")]
    TooManySessions(usize),

    /// Building or reading the parameter records failed.
    #[error("wire error: {0}")]
    Wire(#[from] cramrpc_wire::WireError),
}

impl AuthError {
    /// Failures that put the session or client in the terminal failed state.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            AuthError::InvalidConfig(_)
                | AuthError::UnknownSession(_)
                | AuthError::TooManySessions(_)
                | AuthError::Wire(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
