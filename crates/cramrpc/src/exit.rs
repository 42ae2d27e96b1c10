use std::fmt;
use std::io;

use cramrpc_auth::AuthError;
use cramrpc_peer::PeerError;
use cramrpc_transport::TransportError;
use cramrpc_wire::WireError;

// Exit code constants, sysexits-style where one fits.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const AUTH_FAILED: i32 = 77;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::BindAddr { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::ConnectAddr { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn auth_error(context: &str, err: AuthError) -> CliError {
    match err {
        AuthError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(AUTH_FAILED, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Wire(err) => wire_error(context, err),
        PeerError::Auth(err) => auth_error(context, err),
        PeerError::NotAuthenticated
        | PeerError::AuthNotSupported
        | PeerError::Unsigned => CliError::new(AUTH_FAILED, format!("{context}: {err}")),
        PeerError::AccessDenied => CliError::new(PERMISSION_DENIED, format!("{context}: {err}")),
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::SequenceMismatch { .. } | PeerError::VersionMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PeerError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::NoProc(_) | PeerError::NoObj(_) | PeerError::CallFailed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn auth_failures_map_to_auth_exit_code() {
        let err = peer_error("call failed", PeerError::Auth(AuthError::SignatureMismatch));
        assert_eq!(err.code, AUTH_FAILED);
        assert!(err.message.starts_with("call failed: "));
        assert_eq!(peer_error("call", PeerError::NotAuthenticated).code, AUTH_FAILED);
    }

    #[test]
    fn protocol_statuses_map_to_distinct_codes() {
        assert_eq!(peer_error("x", PeerError::AccessDenied).code, PERMISSION_DENIED);
        assert_eq!(
            peer_error("x", PeerError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
        assert_eq!(peer_error("x", PeerError::NoProc(7)).code, FAILURE);
        assert_eq!(
            peer_error("x", PeerError::Wire(WireError::MalformedParams)).code,
            DATA_INVALID
        );
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let err = peer_error(
            "connect failed",
            PeerError::Transport(TransportError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
