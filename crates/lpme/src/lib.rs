//! # LPME
//!
//! Long-poll message exchange between an application server and a game
//! process that can only poll.
//!
//! The game process can send requests ("events") but can never be dialed.
//! LPME gives every authenticated client an expiring session and an
//! outbound queue, and simulates push by letting the client park a request
//! on that queue until something arrives.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lpme::prelude::*;
//!
//! # async fn start(stored_hash: &str) -> Result<(), LpmeError> {
//! let server = LpmeServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(Argon2Verifier::new(stored_hash)?)
//!     .await?;
//!
//! server.dispatcher().on("test", |_session, body| async move { Ok(body) });
//! server.dispatcher().on("run", |session: Session, body| async move {
//!     session.run("test", body)?;
//!     Ok(Vec::new())
//! });
//!
//! server.run().await
//! # }
//! ```
//!
//! ## Crates
//!
//! - `lpme-protocol`: wire types, headers, batch framing
//! - `lpme-session`: verifier, sessions, expiry, message bus
//! - `lpme` (this crate): dispatch, HTTP surface, server builder

mod config;
mod dispatch;
mod error;
pub mod http;
mod server;

pub use config::PollConfig;
pub use dispatch::{Credentials, EventDispatcher, EventHandler, HandlerFuture, authorize};
pub use error::LpmeError;
pub use server::{LpmeServer, LpmeServerBuilder};

pub use lpme_protocol as protocol;
pub use lpme_session as session;

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"info"` or `"lpme=debug"`).
///
/// Meant for binaries. Does nothing if a global subscriber is already set.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Common imports for LPME users.
///
/// ```rust
/// use lpme::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{EventDispatcher, LpmeError, LpmeServer, LpmeServerBuilder, PollConfig};
    pub use lpme_protocol::{AuthGrant, CommandEnvelope, SessionId, UniqueId};
    pub use lpme_session::{
        Argon2Verifier, ListenerError, ListenerId, Session, SessionConfig, SessionError,
        SessionManager, SessionState, TokenVerifier, VerifierConfig,
    };
}
