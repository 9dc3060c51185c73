//! Lifecycle listeners: async callbacks fired at session transitions.
//!
//! Four categories exist: `on_expire` and `on_teardown` per session, and
//! `on_session_start` / `on_session_end` on the manager. All share the same
//! machinery:
//!
//! - listeners run in insertion order, one after another;
//! - a listener that returns an error or panics is logged and skipped,
//!   the remaining listeners still run;
//! - registration hands back a [`ListenerId`] that can later remove it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::lock;

/// Counter for generating listener handles. Shared by every set so a handle
/// can never remove a listener from the wrong set.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by every `on_*` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Failure reported by a listener. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Wraps any displayable error.
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// The future a listener returns.
pub type ListenerFuture = BoxFuture<'static, Result<(), ListenerError>>;

type Callback<T> = Arc<dyn Fn(T) -> ListenerFuture + Send + Sync>;

/// An ordered, concurrently-mutable list of callbacks taking a `T`.
pub(crate) struct ListenerSet<T> {
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T: Clone + Send + 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add<F, Fut>(&self, callback: F) -> ListenerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let id = ListenerId::next();
        let callback: Callback<T> = Arc::new(move |arg| callback(arg).boxed());
        lock(&self.entries).push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        lock(&self.entries).clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Runs every listener registered at call time, in order.
    ///
    /// The list is snapshotted first so listeners may register or remove
    /// listeners without deadlocking.
    pub(crate) async fn run(&self, arg: T, category: &'static str) {
        let snapshot: Vec<Callback<T>> = lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            match AssertUnwindSafe(callback(arg.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(category, error = %e, "listener failed");
                }
                Err(_) => {
                    tracing::warn!(category, "listener panicked");
                }
            }
        }
    }
}
