//! Codec trait and implementations for serializing/deserializing values.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The session layer uses one to turn a [`CommandEnvelope`] into the opaque
//! bytes it pushes onto the outgoing queue; the client runtime uses the same
//! format to route the command to its handler.
//!
//! [`CommandEnvelope`]: crate::CommandEnvelope

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec lives inside long-lived shared
/// state and may be used from any Tokio worker thread.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what the game-side runtime can parse natively, so this is the
/// agreed format for command envelopes. Byte payloads inside it are
/// base64-encoded (see [`CommandEnvelope`](crate::CommandEnvelope)).
///
/// ## Example
///
/// ```rust
/// use lpme_protocol::{Codec, CommandEnvelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let envelope = CommandEnvelope::new("spawn", b"wave-3".to_vec());
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: CommandEnvelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
