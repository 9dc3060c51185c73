//! Header names shared by the server and the game-side runtime.
//!
//! Credentials travel as request metadata rather than in the body so that
//! event bodies stay entirely handler-defined. All names are lowercase, which
//! is how HTTP libraries normalise them anyway.

/// Candidate API key, sent on the authentication request.
pub const TOKEN: &str = "x-lpme-token";

/// Desired session lifetime in seconds (optional, authentication request).
pub const LIFETIME: &str = "x-lpme-lifetime";

/// The session's local id. Returned on authentication, echoed on every
/// later request.
pub const SESSION_ID: &str = "x-lpme-session-id";

/// The session token. Returned on authentication, echoed on every later
/// request.
pub const SESSION: &str = "x-lpme-session";

/// Per-request override of the long-poll wait, in seconds (optional).
pub const MAX_TTL: &str = "x-lpme-max-ttl";

/// Number of framed messages in a long-poll response body.
pub const CHUNK_COUNT: &str = "x-lpme-chunk-count";
