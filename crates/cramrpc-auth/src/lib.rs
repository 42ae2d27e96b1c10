//! Mutual challenge-response authentication (CRAM) for cramrpc.
//!
//! Both sides prove possession of a shared secret without sending it.
//! Every signature covers the exact parameter bytes of the message plus a
//! pair of random challenges, and the server rotates its challenge on
//! every exchange, so captured messages cannot be replayed into new ones.
//!
//! Authentication rides on every request once the handshake is done:
//! the client signs each call, the server verifies it and signs the reply.

pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod keys;
pub mod server;
pub mod session;
mod sign;

pub use client::{ClientState, CramClient};
pub use config::{AuthConfig, MAX_CHALLENGE_SIZE, MIN_CHALLENGE_SIZE};
pub use error::{AuthError, Result};
pub use hash::{constant_time_eq, HashAlgorithm};
pub use keys::{KeyRecord, KeyRegistry, UserData};
pub use server::{CramServer, Verified};
pub use session::{Challenge, Session, SessionHandle, SessionState, SessionTable};
