//! Envelope and parameter encoding for cramrpc.
//!
//! Every message is a 24-byte big-endian header followed by a chain of
//! self-describing parameter records:
//! - [`Header`] carries magic, version, session, sequence, size and client id
//! - [`ParamBuffer`] builds and reads the records in place
//! - [`MessageReader`] / [`MessageWriter`] delimit messages on byte streams
//!
//! Datagram and shared-memory transports carry one message per unit and
//! need no framing beyond the header.

pub mod config;
pub mod error;
pub mod header;
pub mod ids;
pub mod params;
pub mod reader;
pub mod status;
pub mod writer;

pub use config::WireConfig;
pub use error::{Result, WireError};
pub use header::{
    pack_version, sequence_newer, Header, CLIENT_ID_ASSIGN, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAGIC, NO_SESSION, VERSION, VERSION_MAJOR, VERSION_MINOR,
};
pub use params::{record_len, validate, ParamBuffer, ParamValue, Record, Records, Region};
pub use reader::MessageReader;
pub use status::Status;
pub use writer::MessageWriter;
