//! Envelope rules shared by every transport.
//!
//! The server side parses and judges requests and stamps response
//! headers; the client side checks responses and maps wire statuses to
//! [`PeerError`].

use cramrpc_wire::ids::PARAM_STATUS;
use cramrpc_wire::{Header, Region, Status, WireError, HEADER_SIZE, VERSION};

use crate::error::{PeerError, Result};

/// Structural checks on a received request: header present, magic,
/// size field matching the bytes received, and a sound record chain.
///
/// A failure here means no response is sent at all.
pub fn request_header(input: &Region) -> Result<Header> {
    let header = checked_header(input)?;
    if !input.validate() {
        return Err(WireError::MalformedParams.into());
    }
    Ok(header)
}

/// Write the response header for `output`, echoing the request sequence.
/// The size field always covers the current output length.
pub fn finish_response(output: &mut Region, session: u32, sequence: u32, client_id: u32) {
    let header = Header {
        size: output.message_len() as u32,
        ..Header::new(session, sequence, client_id)
    };
    header.encode(output.header_mut());
}

/// Write the request header for `output` before sending.
pub fn finish_request(output: &mut Region, session: u32, sequence: u32, client_id: u32) {
    finish_response(output, session, sequence, client_id);
}

/// Set the status parameter, replacing the whole reply with a bare FAIL
/// when the handler left no room for it.
pub fn write_status(output: &mut Region, status: Status) {
    if output.set_u32(PARAM_STATUS, status.code()).is_err() {
        output.clear();
        // An empty region always has room for one u32 record.
        let _ = output.set_u32(PARAM_STATUS, Status::Fail.code());
    }
}

/// Structural checks on a response plus the sequence match.
///
/// Protocol statuses are left for [`response_status`] so the caller can
/// verify signatures first.
pub fn check_envelope(input: &Region, expected_sequence: u32) -> Result<Header> {
    let header = checked_header(input)?;
    if !input.validate() {
        return Err(WireError::MalformedParams.into());
    }
    if header.sequence != expected_sequence {
        return Err(PeerError::SequenceMismatch {
            expected: expected_sequence,
            got: header.sequence,
        });
    }
    Ok(header)
}

/// The status a response carries. Responses without one are malformed.
pub fn response_status(header: &Header, input: &Region) -> Result<Status> {
    if !header.version_compatible() {
        return Ok(Status::VersionMismatch);
    }
    match input.get(PARAM_STATUS) {
        Some(raw) if raw.len() == 4 => Ok(Status::from_code(input.get_u32(PARAM_STATUS))),
        _ => Err(WireError::MalformedParams.into()),
    }
}

/// Map a status to the call result.
pub fn status_result(header: &Header, status: Status, procedure: u32, object: u32) -> Result<()> {
    match PeerError::from_status(status, procedure, object) {
        None => Ok(()),
        Some(PeerError::VersionMismatch { .. }) => Err(PeerError::VersionMismatch {
            local: VERSION,
            remote: header.version,
        }),
        Some(err) => Err(err),
    }
}

/// Client-side check of a complete response: structure, sequence,
/// version and status, in that order.
pub fn client_check_header(
    input: &Region,
    expected_sequence: u32,
    procedure: u32,
    object: u32,
) -> Result<Header> {
    let header = check_envelope(input, expected_sequence)?;
    let status = response_status(&header, input)?;
    status_result(&header, status, procedure, object)?;
    Ok(header)
}

fn checked_header(region: &Region) -> Result<Header> {
    if region.header_size() != HEADER_SIZE {
        return Err(WireError::Truncated {
            len: region.header_size(),
            needed: HEADER_SIZE,
        }
        .into());
    }
    Ok(Header::check(region.message())?)
}
