//! Core protocol types for LPME's wire format.
//!
//! These are the structures that cross the bridge: the identifiers a client
//! echoes back, the grant it receives after authenticating, and the envelope
//! that wraps every server-issued command.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The process-scoped identifier of a live session (the "local id").
///
/// The client sends it back on every request so the server can find its
/// session without scanning. It is unique among sessions a manager tracks
/// at any moment, and may be reused only after the previous holder has been
/// torn down and removed.
///
/// `u32` keeps it exactly representable as a double-precision number on
/// the game side. `#[serde(transparent)]` makes `SessionId(7)` serialize as
/// plain `7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// A globally unique, never-reused session identity.
///
/// Unlike [`SessionId`] this is stable for correlation across processes
/// (logs, external stores). It is an opaque string; the session layer
/// derives it from a timestamp plus secure randomness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    /// Wraps an already-generated identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AuthGrant
// ---------------------------------------------------------------------------

/// What a client receives after a successful authentication.
///
/// The same values are also sent as response headers so that clients which
/// never parse bodies can still pick them up.
///
/// ```json
/// { "localId": 4, "uniqueId": "0190c3…", "token": "9f2c…" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    /// Echo this back in the session-id header.
    pub local_id: SessionId,
    /// Stable identity for correlation.
    pub unique_id: UniqueId,
    /// Hex-encoded secret. Echo this back in the session header.
    pub token: String,
}

// ---------------------------------------------------------------------------
// CommandEnvelope
// ---------------------------------------------------------------------------

/// A fire-and-forget instruction from the server to the game process.
///
/// The client's dispatcher looks at `command_id` to pick a handler and hands
/// it `body`. The body is arbitrary bytes, so on the wire it is carried as a
/// standard (padded) base64 string:
///
/// ```json
/// { "commandId": "spawn", "body": "d2F2ZS0z" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Which client-side handler should receive this command.
    pub command_id: String,

    /// Handler-defined payload.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl CommandEnvelope {
    /// Builds an envelope for `command_id` carrying `body`.
    pub fn new(command_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            command_id: command_id.into(),
            body: body.into(),
        }
    }
}

/// Serde adapter: `Vec<u8>` ↔ base64 string.
mod base64_bytes {
    use super::*;

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// =========================================================================
// Tests
// =========================================================================
