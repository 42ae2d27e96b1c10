use std::fmt;

/// Wire-visible outcome of a call, carried in [`crate::ids::PARAM_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Fail = 1,
    VersionMismatch = 2,
    AuthNotSupported = 3,
    NotAuthenticated = 4,
    AccessDenied = 5,
    NoProc = 6,
    NoObj = 7,
}

impl Status {
    /// Wire value.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire value. Unknown codes read as [`Status::Fail`].
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Status::Ok,
            2 => Status::VersionMismatch,
            3 => Status::AuthNotSupported,
            4 => Status::NotAuthenticated,
            5 => Status::AccessDenied,
            6 => Status::NoProc,
            7 => Status::NoObj,
            _ => Status::Fail,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Statuses that a server emits only after a verified request, and
    /// therefore always signs.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Status::Ok | Status::Fail | Status::AccessDenied | Status::NoProc | Status::NoObj
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Fail => "FAIL",
            Status::VersionMismatch => "VERSION_MISMATCH",
            Status::AuthNotSupported => "AUTH_NOT_SUPPORTED",
            Status::NotAuthenticated => "NOT_AUTHENTICATED",
            Status::AccessDenied => "ACCESS_DENIED",
            Status::NoProc => "NO_PROC",
            Status::NoObj => "NO_OBJ",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
