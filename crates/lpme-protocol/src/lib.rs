//! Wire protocol for LPME.
//!
//! This crate defines what travels between the application server and the
//! polling game process:
//!
//! - **Types** ([`SessionId`], [`UniqueId`], [`AuthGrant`],
//!   [`CommandEnvelope`]): the structures that get serialized.
//! - **Headers** ([`headers`]): the request/response metadata names that
//!   carry credentials and poll options.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how structured values are
//!   converted to/from bytes.
//! - **Framing** ([`encode_batch`], [`decode_batch`]): how a long-poll
//!   batch of opaque messages is packed into one response body.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sessions, expiry, or HTTP. Both
//! ends of the bridge must agree on everything in here, so it is kept
//! small and free of runtime dependencies.
//!
//! ```text
//! HTTP surface (lpme) → Protocol (bytes ↔ types) ← Session (lpme-session)
//! ```

mod codec;
mod error;
mod frame;
pub mod headers;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{FRAME_HEADER_LEN, decode_batch, encode_batch};
pub use types::{AuthGrant, CommandEnvelope, SessionId, UniqueId};
