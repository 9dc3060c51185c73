//! Session types: the server's record of one authenticated game process.
//!
//! A session tracks:
//! - WHO the client is (`local_id` for lookup, `unique_id` for correlation)
//! - HOW it proves it on every request (a secret token)
//! - WHEN it dies unless it keeps talking (`expires_at`, pushed forward by
//!   `lifetime` on every bump)
//! - WHAT the server still wants to tell it (the outbound [`MessageBus`])
//!
//! # Lifecycle
//!
//! ```text
//!            bump / validate (pushes expires_at forward)
//!               ┌──────┐
//!               ▼      │
//!   start ──→ [Active] ─┴──(expires_at passes)──→ on_expire ─┐
//!               │                                            ├─→ teardown ─→ [TornDown]
//!               └──────────(explicit teardown)───────────────┘
//! ```
//!
//! Teardown runs exactly once, no matter how many callers race for it:
//!
//! 1. cancel the expiry timer
//! 2. run `on_expire` listeners (expiry path only)
//! 3. wipe the token, forget `expires_at` and `lifetime`
//! 4. close the message bus, releasing any blocked poll
//! 5. run `on_teardown` listeners (ids are still readable)
//! 6. mark the session `TornDown` and drop it from its manager
//!
//! # The expiry timer
//!
//! Each active session owns one background task. It never trusts a deadline
//! it computed earlier: every time it wakes it re-reads `expires_at` under
//! the lock, and either sleeps again until the new deadline or claims the
//! teardown. A bump therefore never needs to touch the timer.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use lpme_protocol::{Codec, CommandEnvelope, JsonCodec, SessionId, UniqueId};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use zeroize::Zeroize;

use crate::listener::{ListenerError, ListenerId, ListenerSet};
use crate::manager::Registry;
use crate::{MessageBus, SessionError, deadline_after, lock};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Lifetime used when the client does not ask for one.
    ///
    /// Default: 30 seconds.
    pub default_lifetime: Duration,

    /// Upper bound on a client-requested lifetime.
    ///
    /// Default: one hour.
    pub max_lifetime: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_lifetime: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

impl SessionConfig {
    /// Returns a copy with nonsensical values corrected: a zero default
    /// falls back to the built-in default, and `max_lifetime` is raised to
    /// at least `default_lifetime`.
    pub fn validated(mut self) -> Self {
        if self.default_lifetime.is_zero() {
            self.default_lifetime = Self::default().default_lifetime;
        }
        if self.max_lifetime < self.default_lifetime {
            self.max_lifetime = self.default_lifetime;
        }
        self
    }

    /// Resolves the lifetime for a new session. Absent or zero requests get
    /// the default; anything longer than `max_lifetime` is clamped.
    pub fn lifetime_for(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(lifetime) if !lifetime.is_zero() => lifetime.min(self.max_lifetime),
            _ => self.default_lifetime,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
///
/// `TornDown` is terminal: once there, the session can't be bumped,
/// validated, or pushed to again. Its ids stay readable so late observers
/// (logs, `on_session_end` listeners) can still say which session it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting requests and messages.
    Active,

    /// Teardown has completed.
    TornDown,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Expired,
    Explicit,
}

/// Mutable fields, all behind one lock so that the expiry timer, a bump,
/// and a teardown always observe each other's writes in a single order.
struct Core {
    token: String,
    /// `None` once torn down; bumping is then refused.
    lifetime: Option<Duration>,
    expires_at: Option<Instant>,
    /// Set by whoever claims teardown first. Everyone else backs off.
    closing: bool,
    state: SessionState,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    local_id: SessionId,
    unique_id: UniqueId,
    core: Mutex<Core>,
    bus: MessageBus,
    on_expire: ListenerSet<Session>,
    on_teardown: ListenerSet<Session>,
    registry: Weak<Registry>,
}

/// A handle to one authenticated client's session.
///
/// Cloning is cheap and every clone refers to the same session. Sessions
/// are created by [`SessionManager`](crate::SessionManager) only.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub(crate) fn new(
        local_id: SessionId,
        unique_id: UniqueId,
        token: String,
        lifetime: Duration,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_id,
                unique_id,
                core: Mutex::new(Core {
                    token,
                    lifetime: Some(lifetime),
                    expires_at: Some(deadline_after(Instant::now(), lifetime)),
                    closing: false,
                    state: SessionState::Active,
                    timer: None,
                }),
                bus: MessageBus::new(),
                on_expire: ListenerSet::new(),
                on_teardown: ListenerSet::new(),
                registry,
            }),
        }
    }

    /// Spawns the expiry timer. Must be called exactly once, from inside a
    /// Tokio runtime.
    pub(crate) fn start_expiry_timer(&self) {
        let handle = tokio::spawn(run_expiry_timer(Arc::downgrade(&self.inner)));
        let mut core = lock(&self.inner.core);
        // If a teardown already won, the timer sees `closing` and exits.
        if !core.closing {
            core.timer = Some(handle);
        }
    }

    // -- Accessors ---------------------------------------------------------

    /// The process-scoped id the client echoes on every request.
    pub fn local_id(&self) -> SessionId {
        self.inner.local_id
    }

    /// The never-reused identity of this session.
    pub fn unique_id(&self) -> &UniqueId {
        &self.inner.unique_id
    }

    /// The hex token issued to the client. Empty after teardown.
    pub fn token(&self) -> String {
        lock(&self.inner.core).token.clone()
    }

    /// How far each bump pushes the deadline. `None` after teardown.
    pub fn lifetime(&self) -> Option<Duration> {
        lock(&self.inner.core).lifetime
    }

    /// The current expiry deadline. `None` after teardown.
    pub fn expires_at(&self) -> Option<Instant> {
        lock(&self.inner.core).expires_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.inner.core).state
    }

    /// `true` until teardown has been claimed.
    pub fn is_active(&self) -> bool {
        !lock(&self.inner.core).closing
    }

    /// Number of messages waiting for the next poll.
    pub fn pending(&self) -> usize {
        self.inner.bus.len()
    }

    // -- Operations --------------------------------------------------------

    /// Pushes the expiry deadline to `now + lifetime` and returns it.
    ///
    /// # Errors
    /// Returns [`SessionError::InactiveSession`] once teardown has begun.
    pub fn bump(&self) -> Result<Instant, SessionError> {
        let mut core = lock(&self.inner.core);
        match core.lifetime {
            Some(lifetime) if !core.closing => {
                let deadline = deadline_after(Instant::now(), lifetime);
                core.expires_at = Some(deadline);
                Ok(deadline)
            }
            _ => Err(SessionError::InactiveSession(self.inner.local_id)),
        }
    }

    /// Compares `candidate` with the session token in constant time.
    ///
    /// Returns `false` after teardown, once the deadline has passed, or on
    /// any mismatch (including a length mismatch). On success the session
    /// is bumped if `bump_after` is set, in the same critical section as
    /// the comparison.
    pub fn validate(&self, candidate: &[u8], bump_after: bool) -> bool {
        let mut core = lock(&self.inner.core);
        if core.closing || core.token.is_empty() {
            return false;
        }
        let now = Instant::now();
        if core.expires_at.is_none_or(|deadline| deadline <= now) {
            return false;
        }

        let matches: bool = core.token.as_bytes().ct_eq(candidate).into();
        if matches && bump_after {
            if let Some(lifetime) = core.lifetime {
                core.expires_at = Some(deadline_after(now, lifetime));
            }
        }
        matches
    }

    /// Queues an opaque message for the client's next poll.
    ///
    /// # Errors
    /// Returns [`SessionError::InactiveSession`] once the outbound queue has
    /// been closed by teardown.
    pub fn push(&self, message: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.inner
            .bus
            .push(message.into())
            .map_err(|_| SessionError::InactiveSession(self.inner.local_id))
    }

    /// Sends a command to the client's dispatcher.
    ///
    /// Wraps `body` in a JSON [`CommandEnvelope`] and pushes it. There is no
    /// acknowledgment: whether the client has a handler for `command_id` is
    /// invisible from here.
    pub fn run(&self, command_id: &str, body: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        let envelope = CommandEnvelope::new(command_id, body);
        let bytes = JsonCodec.encode(&envelope)?;
        self.push(bytes)?;
        tracing::debug!(local_id = %self.inner.local_id, command_id, "command queued");
        Ok(())
    }

    /// Drains the outbound queue, waiting up to `max_ttl` for a message if
    /// it is empty. Returns early with whatever is queued if the session is
    /// torn down meanwhile.
    pub async fn long_poll(&self, max_ttl: Duration) -> Vec<Vec<u8>> {
        self.inner.bus.drain_or_wait(max_ttl).await
    }

    /// Tears the session down. Idempotent: only the first caller (or the
    /// expiry timer, if it got there first) runs the sequence; later calls
    /// return at once.
    ///
    /// The sequence runs on its own task, so it completes even if the
    /// returned future is dropped.
    pub async fn teardown(&self) {
        let timer = {
            let mut core = lock(&self.inner.core);
            if core.closing {
                return;
            }
            core.closing = true;
            core.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        let session = self.clone();
        let sequence = tokio::spawn(async move { session.run_teardown(Cause::Explicit).await });
        if let Err(e) = sequence.await {
            tracing::warn!(local_id = %self.inner.local_id, error = %e, "teardown task failed");
        }
    }

    // -- Listeners ---------------------------------------------------------

    /// Registers a listener that runs when the session expires, before its
    /// state is cleared. Not called on explicit teardown.
    ///
    /// On a session that is already `TornDown` the listener is dropped
    /// unrun; the returned id matches nothing.
    pub fn on_expire<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        // Held across `add` so the teardown sequence can't clear the set
        // between the state check and the insert.
        let core = lock(&self.inner.core);
        if core.state == SessionState::TornDown {
            return ListenerId::next();
        }
        self.inner.on_expire.add(listener)
    }

    /// Registers a listener that runs on every teardown, after the token is
    /// wiped and the queue closed.
    ///
    /// On a session that is already `TornDown` the listener is dropped
    /// unrun; the returned id matches nothing.
    pub fn on_teardown<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let core = lock(&self.inner.core);
        if core.state == SessionState::TornDown {
            return ListenerId::next();
        }
        self.inner.on_teardown.add(listener)
    }

    /// Removes a listener registered on this session. Returns `false` if it
    /// was not found.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.on_expire.remove(id) || self.inner.on_teardown.remove(id)
    }

    // -- Teardown sequence -------------------------------------------------

    /// Steps 2–6. The caller has already claimed `closing` and dealt with
    /// the timer.
    async fn run_teardown(&self, cause: Cause) {
        let local_id = self.inner.local_id;
        let unique_id = &self.inner.unique_id;

        if cause == Cause::Expired {
            tracing::info!(%local_id, %unique_id, "session expired");
            self.inner.on_expire.run(self.clone(), "on_expire").await;
        }

        {
            let mut core = lock(&self.inner.core);
            core.token.zeroize();
            core.expires_at = None;
            core.lifetime = None;
        }
        self.inner.bus.close();

        self.inner.on_teardown.run(self.clone(), "on_teardown").await;

        lock(&self.inner.core).state = SessionState::TornDown;
        // Listeners often capture the session; dropping them breaks the cycle.
        self.inner.on_expire.clear();
        self.inner.on_teardown.clear();
        tracing::info!(%local_id, %unique_id, ?cause, "session torn down");

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.release(self);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_id", &self.inner.local_id)
            .field("unique_id", &self.inner.unique_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The per-session expiry loop. Holds only a weak reference between wake-ups
/// so it never keeps a dropped session alive.
async fn run_expiry_timer(session: Weak<Inner>) {
    loop {
        let Some(inner) = session.upgrade() else {
            return;
        };

        let next_deadline = {
            let mut core = lock(&inner.core);
            let expires_at = core.expires_at;
            match expires_at {
                _ if core.closing => return,
                Some(deadline) if deadline > Instant::now() => Some(deadline),
                Some(_) => {
                    core.closing = true;
                    // Dropping our own handle detaches this task; it must
                    // not be aborted halfway through the teardown below.
                    core.timer = None;
                    None
                }
                None => return,
            }
        };

        match next_deadline {
            Some(deadline) => {
                drop(inner);
                time::sleep_until(deadline).await;
            }
            None => {
                Session { inner }.run_teardown(Cause::Expired).await;
                return;
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
