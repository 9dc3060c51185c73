//! Long-poll batch framing.
//!
//! A poll returns any number of opaque messages in a single response body.
//! Each message is prefixed with its length as a little-endian `u32`:
//!
//! ```text
//! ┌──────────┬───────────────┬──────────┬───────────────┬─────
//! │ len (4B) │ message bytes │ len (4B) │ message bytes │ ...
//! └──────────┴───────────────┴──────────┴───────────────┴─────
//! ```
//!
//! The response also carries the message count in a header, but the body
//! is self-describing so `decode_batch` does not need it.

use crate::ProtocolError;

/// Size of the length prefix in front of every message.
pub const FRAME_HEADER_LEN: usize = 4;

/// Packs `messages` into one length-prefixed buffer, preserving order.
///
/// # Errors
/// Returns [`ProtocolError::FrameTooLarge`] if a message is longer than
/// `u32::MAX` bytes.
pub fn encode_batch<M: AsRef<[u8]>>(messages: &[M]) -> Result<Vec<u8>, ProtocolError> {
    let total: usize = messages
        .iter()
        .map(|m| FRAME_HEADER_LEN + m.as_ref().len())
        .sum();
    let mut out = Vec::with_capacity(total);

    for message in messages {
        let bytes = message.as_ref();
        let len = u32::try_from(bytes.len())
            .map_err(|_| ProtocolError::FrameTooLarge(bytes.len()))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(bytes);
    }

    Ok(out)
}

/// Unpacks a buffer produced by [`encode_batch`].
///
/// # Errors
/// Returns [`ProtocolError::TruncatedFrame`] if a length prefix or the
/// message it announces runs past the end of `data`.
pub fn decode_batch(data: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let header_end = offset + FRAME_HEADER_LEN;
        let header: [u8; FRAME_HEADER_LEN] = data
            .get(offset..header_end)
            .and_then(|h| h.try_into().ok())
            .ok_or(ProtocolError::TruncatedFrame { offset })?;
        let len = u32::from_le_bytes(header) as usize;

        let body = data
            .get(header_end..header_end + len)
            .ok_or(ProtocolError::TruncatedFrame { offset })?;
        messages.push(body.to_vec());
        offset = header_end + len;
    }

    Ok(messages)
}
