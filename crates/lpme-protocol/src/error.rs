//! Error types for the protocol layer.
//!
//! Each crate in LPME defines its own error enum. When you see a
//! `ProtocolError`, the problem is in serialization or framing, not in
//! session state or networking.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// `body` field that is not valid base64.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A long-poll batch could not be unpacked.
    ///
    /// `offset` is the byte position where the broken frame starts.
    #[error("truncated frame at byte {offset}")]
    TruncatedFrame { offset: usize },

    /// A single message is too large to be described by a frame header.
    #[error("message of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
}
