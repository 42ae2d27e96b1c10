//! Reserved procedure and parameter ids.
//!
//! Ids below [`USER_ID_START`] belong to the protocol.
//! Ids from `0x2000_0000` upward are available to applications, for both
//! procedures and parameters.

/// First id available to application code.
pub const USER_ID_START: u32 = 0x2000_0000;

/// Reports whether the server requires authentication. Never needs auth.
pub const PROC_GET_CAPABILITIES: u32 = 1;

/// Runs one leg of the CRAM handshake.
pub const PROC_AUTHENTICATE: u32 = 2;

/// Ends the session after one final signed response.
pub const PROC_LOGOUT: u32 = 3;

/// u32, 1 when the server requires authentication.
pub const PARAM_NEED_AUTH: u32 = 1;

/// u32, hash algorithm offered by the server.
pub const PARAM_AUTH_TYPE: u32 = 2;

/// u32 status code carried in every response.
pub const PARAM_STATUS: u32 = 3;

/// u32 procedure id of a request.
pub const PARAM_PROCEDURE: u32 = 4;

/// u32 object id of a request. 0 addresses no object.
pub const PARAM_OBJECT: u32 = 5;

/// First id of the authentication sub-range.
pub const AUTH_RANGE_START: u32 = 0x100;

/// Last id of the authentication sub-range.
pub const AUTH_RANGE_END: u32 = 0x1FF;

/// u32 hash algorithm used for the signatures.
pub const PARAM_AUTH_HASH_TYPE: u32 = 0x100;

/// u32 number of parameter-area bytes covered by the signature.
pub const PARAM_AUTH_SIGNED_SIZE: u32 = 0x101;

/// Server challenge bytes.
pub const PARAM_AUTH_SERVER_CHALLENGE: u32 = 0x102;

/// Client challenge bytes.
pub const PARAM_AUTH_CLIENT_CHALLENGE: u32 = 0x103;

/// Server proof of key possession.
pub const PARAM_AUTH_SERVER_RESPONSE: u32 = 0x104;

/// Client proof of key possession.
pub const PARAM_AUTH_CLIENT_RESPONSE: u32 = 0x105;

/// Returns a human-readable name for a parameter id.
pub fn param_name(id: u32) -> &'static str {
    match id {
        PARAM_NEED_AUTH => "NEED_AUTH",
        PARAM_AUTH_TYPE => "AUTH_TYPE",
        PARAM_STATUS => "STATUS",
        PARAM_PROCEDURE => "PROCEDURE",
        PARAM_OBJECT => "OBJECT",
        PARAM_AUTH_HASH_TYPE => "AUTH_HASH_TYPE",
        PARAM_AUTH_SIGNED_SIZE => "AUTH_SIGNED_SIZE",
        PARAM_AUTH_SERVER_CHALLENGE => "AUTH_SERVER_CHALLENGE",
        PARAM_AUTH_CLIENT_CHALLENGE => "AUTH_CLIENT_CHALLENGE",
        PARAM_AUTH_SERVER_RESPONSE => "AUTH_SERVER_RESPONSE",
        PARAM_AUTH_CLIENT_RESPONSE => "AUTH_CLIENT_RESPONSE",
        AUTH_RANGE_START..=AUTH_RANGE_END => "AUTH_RESERVED",
        id if id < USER_ID_START => "RESERVED",
        _ => "USER",
    }
}

/// Returns a human-readable name for a procedure id.
pub fn procedure_name(id: u32) -> &'static str {
    match id {
        PROC_GET_CAPABILITIES => "GET_CAPABILITIES",
        PROC_AUTHENTICATE => "AUTHENTICATE",
        PROC_LOGOUT => "LOGOUT",
        id if id < USER_ID_START => "RESERVED",
        _ => "USER",
    }
}

/// Returns true if the id is reserved for the protocol.
pub fn is_reserved(id: u32) -> bool {
    id < USER_ID_START
}

/// Returns true if the id lies in the authentication sub-range.
pub fn is_auth_param(id: u32) -> bool {
    (AUTH_RANGE_START..=AUTH_RANGE_END).contains(&id)
}
