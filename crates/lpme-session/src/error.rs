//! Error types for the session layer.

use lpme_protocol::{ProtocolError, SessionId};

/// Errors that can occur during session management.
///
/// These cover the full lifecycle of a session: verification, creation,
/// lookup, and use after teardown.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The candidate key failed verification, or a request's token did not
    /// match its session. Never creates or mutates session state.
    #[error("authentication failed")]
    Authentication,

    /// The local id does not resolve to a live session: it expired, was
    /// torn down, or never existed.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// An operation that needs a live session (`bump`, `push`) was attempted
    /// after teardown.
    #[error("session {0} is no longer active")]
    InactiveSession(SessionId),

    /// The hashing subsystem itself faulted. This is a verifier malfunction,
    /// not a bad credential, and is logged as such.
    #[error("token verification fault: {0}")]
    Verification(String),

    /// The stored key hash is not a usable Argon2id PHC string.
    #[error("invalid key hash: {0}")]
    InvalidKeyHash(String),

    /// Every local id is held by a live session.
    #[error("session id space exhausted")]
    IdSpaceExhausted,

    /// A command envelope could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
