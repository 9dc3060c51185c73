//! Session lifecycle management for LPME.
//!
//! This crate owns everything that happens between "a game process proved
//! it knows the key" and "that process is gone":
//!
//! 1. **Verification**: checking the presented key against a stored
//!    Argon2id hash ([`TokenVerifier`], [`Argon2Verifier`])
//! 2. **Session tracking**: allocating ids, issuing tokens, finding
//!    sessions again ([`SessionManager`])
//! 3. **Expiry**: every session dies unless activity keeps bumping its
//!    deadline forward ([`Session::bump`], [`Session::validate`])
//! 4. **Outbound delivery**: a per-session queue the client drains with
//!    long-polls ([`MessageBus`], [`Session::long_poll`])
//!
//! # How it fits in the stack
//!
//! ```text
//! HTTP surface (lpme, above)  ← resolves sessions, validates tokens, dispatches events
//!     ↕
//! Session Layer (this crate)  ← identity, expiry, teardown, outbound queue
//!     ↕
//! Protocol Layer (below)      ← SessionId, UniqueId, CommandEnvelope
//! ```
//!
//! # Locking
//!
//! All shared state sits behind `std::sync::Mutex`. Critical sections are
//! short and never span an `.await`, so an async mutex would only add
//! overhead.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

mod bus;
mod error;
mod listener;
mod manager;
mod session;
mod verifier;

pub use bus::{BusClosed, MessageBus};
pub use error::SessionError;
pub use listener::{ListenerError, ListenerFuture, ListenerId};
pub use manager::SessionManager;
pub use session::{Session, SessionConfig, SessionState};
pub use verifier::{Argon2Verifier, TokenVerifier, VerifierConfig};

/// Locks `mutex`, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent at each
/// step, so a poisoned lock carries no torn state worth refusing.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Roughly 30 years. Anything further out is treated as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating at a far-future instant instead of panicking
/// on overflow.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
