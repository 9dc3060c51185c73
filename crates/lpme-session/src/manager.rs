//! The session manager: owns every live session.
//!
//! This is the central piece of the session layer. It's responsible for:
//! - Verifying keys before anything is created
//! - Allocating a `local_id` that no live session holds
//! - Generating the `unique_id` and the secret token
//! - Starting each session's expiry timer
//! - Dropping sessions from the map once their teardown completes
//! - Running the manager-wide `on_session_start` / `on_session_end` listeners
//!
//! # Concurrency note
//!
//! `SessionManager` is a cheap, cloneable handle. All clones share one
//! registry whose map sits behind a `Mutex`; lookups, inserts and removals
//! are serialized by it. Sessions hold only a weak reference back, so
//! dropping the last manager handle frees everything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use lpme_protocol::{SessionId, UniqueId};
use rand::RngCore;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::listener::{ListenerError, ListenerId, ListenerSet};
use crate::{Session, SessionConfig, SessionError, TokenVerifier, lock};

/// Random bytes in a session token (hex-encoded to twice as many chars).
const TOKEN_BYTES: usize = 64;

/// The state every [`SessionManager`] clone shares.
pub(crate) struct Registry {
    verifier: Arc<dyn TokenVerifier>,
    config: SessionConfig,
    sessions: Mutex<Sessions>,
    on_session_start: ListenerSet<Session>,
    on_session_end: ListenerSet<Session>,
}

struct Sessions {
    by_id: HashMap<SessionId, Session>,
    /// Where the next id search starts.
    next_id: u32,
    /// Highest id handed out. `u32::MAX` outside tests.
    id_ceiling: u32,
}

impl Sessions {
    /// Finds an id in `1..=id_ceiling` that no tracked session holds,
    /// continuing round-robin from the last allocation.
    fn allocate(&mut self) -> Option<SessionId> {
        if self.by_id.len() >= self.id_ceiling as usize {
            return None;
        }
        loop {
            let candidate = SessionId(self.next_id);
            self.next_id = if self.next_id >= self.id_ceiling { 1 } else { self.next_id + 1 };
            if !self.by_id.contains_key(&candidate) {
                return Some(candidate);
            }
        }
    }
}

impl Registry {
    /// Called by a session at the very end of its teardown.
    ///
    /// Only removes the entry if it still belongs to `session`, then fires
    /// `on_session_end` on a detached task.
    pub(crate) fn release(self: &Arc<Self>, session: &Session) {
        let local_id = session.local_id();
        let removed = {
            let mut sessions = lock(&self.sessions);
            let is_current = sessions
                .by_id
                .get(&local_id)
                .is_some_and(|tracked| tracked.unique_id() == session.unique_id());
            is_current && sessions.by_id.remove(&local_id).is_some()
        };
        if !removed {
            return;
        }

        tracing::debug!(%local_id, "session removed from manager");
        let registry = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            registry.on_session_end.run(session, "on_session_end").await;
        });
    }
}

/// Creates, finds, and forgets sessions.
///
/// ## Lifecycle
///
/// ```text
/// authenticate() ──(verify ok)──→ start_session() ──→ [Active]
///       │                              │                  │
///       ▼                              ▼                  ▼ (expiry or teardown)
///  Authentication               on_session_start     removed from map
///  (nothing created)            (before returning)   ──→ on_session_end (detached)
/// ```
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<Registry>,
}

impl SessionManager {
    /// Creates a manager that checks keys with `verifier`.
    pub fn new(verifier: Arc<dyn TokenVerifier>, config: SessionConfig) -> Self {
        Self::with_id_ceiling(verifier, config, u32::MAX)
    }

    fn with_id_ceiling(
        verifier: Arc<dyn TokenVerifier>,
        config: SessionConfig,
        id_ceiling: u32,
    ) -> Self {
        Self {
            registry: Arc::new(Registry {
                verifier,
                config: config.validated(),
                sessions: Mutex::new(Sessions {
                    by_id: HashMap::new(),
                    next_id: 1,
                    id_ceiling,
                }),
                on_session_start: ListenerSet::new(),
                on_session_end: ListenerSet::new(),
            }),
        }
    }

    /// The (validated) expiry configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.registry.config
    }

    /// Verifies `candidate_key` and, if it matches, starts a session.
    ///
    /// Verification runs on Tokio's blocking pool. A rejected key has no
    /// side effects at all.
    ///
    /// # Errors
    /// - [`SessionError::Authentication`] if the key does not match
    /// - [`SessionError::Verification`] if the verifier itself failed
    /// - anything [`start_session`](Self::start_session) returns
    pub async fn authenticate(
        &self,
        candidate_key: &str,
        lifetime: Option<Duration>,
    ) -> Result<Session, SessionError> {
        let verifier = Arc::clone(&self.registry.verifier);
        let candidate = Zeroizing::new(candidate_key.as_bytes().to_vec());

        let verdict = tokio::task::spawn_blocking(move || verifier.verify(&candidate))
            .await
            .map_err(|e| SessionError::Verification(format!("verifier task failed: {e}")))
            .and_then(std::convert::identity);

        match verdict {
            Ok(true) => self.start_session(lifetime).await,
            Ok(false) => {
                tracing::debug!("authentication rejected");
                Err(SessionError::Authentication)
            }
            Err(e) => {
                tracing::error!(error = %e, "token verifier fault");
                Err(e)
            }
        }
    }

    /// Creates and registers a session without checking any key.
    ///
    /// `on_session_start` listeners have all completed by the time this
    /// returns, so server-side state is ready before the client ever sees
    /// its token.
    ///
    /// # Errors
    /// Returns [`SessionError::IdSpaceExhausted`] if every id is taken.
    pub async fn start_session(&self, lifetime: Option<Duration>) -> Result<Session, SessionError> {
        let lifetime = self.registry.config.lifetime_for(lifetime);
        let unique_id = generate_unique_id();
        let token = generate_token();

        let session = {
            let mut sessions = lock(&self.registry.sessions);
            let Some(local_id) = sessions.allocate() else {
                drop(sessions);
                tracing::error!(%unique_id, "session id space exhausted");
                return Err(SessionError::IdSpaceExhausted);
            };
            let session = Session::new(
                local_id,
                unique_id,
                token,
                lifetime,
                Arc::downgrade(&self.registry),
            );
            sessions.by_id.insert(local_id, session.clone());
            session
        };
        session.start_expiry_timer();

        tracing::info!(
            local_id = %session.local_id(),
            unique_id = %session.unique_id(),
            lifetime_secs = lifetime.as_secs_f64(),
            "session started"
        );
        self.registry
            .on_session_start
            .run(session.clone(), "on_session_start")
            .await;
        Ok(session)
    }

    /// Looks up a tracked session. Performs **no** token validation.
    pub fn get_session(&self, local_id: SessionId) -> Option<Session> {
        lock(&self.registry.sessions).by_id.get(&local_id).cloned()
    }

    /// Ids of every tracked session, in ascending order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.registry.sessions).by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        lock(&self.registry.sessions).by_id.len()
    }

    /// Returns `true` if no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tears down every tracked session, e.g. on server shutdown. Blocked
    /// polls are released with whatever their queue held.
    pub async fn teardown_all(&self) {
        let sessions: Vec<Session> =
            lock(&self.registry.sessions).by_id.values().cloned().collect();
        let count = sessions.len();
        join_all(sessions.iter().map(|session| session.teardown())).await;
        tracing::info!(count, "all sessions torn down");
    }

    // -- Listeners ---------------------------------------------------------

    /// Registers a listener run for every new session, before
    /// [`start_session`](Self::start_session) returns.
    pub fn on_session_start<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.registry.on_session_start.add(listener)
    }

    /// Registers a listener run on a detached task after a session has been
    /// torn down and removed.
    pub fn on_session_end<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.registry.on_session_end.add(listener)
    }

    /// Removes a manager-wide listener. Returns `false` if it was not found.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.on_session_start.remove(id) || self.registry.on_session_end.remove(id)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .field("config", &self.registry.config)
            .finish_non_exhaustive()
    }
}

/// A UUIDv7: millisecond timestamp followed by random bits, so ids are
/// unique and also sort by creation time.
fn generate_unique_id() -> UniqueId {
    UniqueId::new(Uuid::now_v7().to_string())
}

/// Generates a 128-character hex token (512 bits from the thread-local
/// CSPRNG).
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let token = bytes.iter().map(|b| format!("{b:02x}")).collect();
    bytes.zeroize();
    token
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionManager`.
    //!
    //! Verification is stubbed out with tiny `TokenVerifier`s so these tests
    //! focus on bookkeeping; the Argon2 path is covered in `tests/`.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::time;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    struct FixedKey(&'static str);

    impl TokenVerifier for FixedKey {
        fn verify(&self, candidate: &[u8]) -> Result<bool, SessionError> {
            Ok(candidate == self.0.as_bytes())
        }
    }

    struct Broken;

    impl TokenVerifier for Broken {
        fn verify(&self, _: &[u8]) -> Result<bool, SessionError> {
            Err(SessionError::Verification("corrupt hash".into()))
        }
    }

    struct Panicking;

    impl TokenVerifier for Panicking {
        fn verify(&self, _: &[u8]) -> Result<bool, SessionError> {
            panic!("verifier bug")
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(FixedKey("secret")), SessionConfig::default())
    }

    // -- authenticate ------------------------------------------------------

    #[tokio::test]
    async fn test_authenticate_correct_key_returns_tracked_session() {
        let manager = manager();

        let session = manager.authenticate("secret", None).await.unwrap();

        assert_eq!(session.local_id(), SessionId(1));
        assert_eq!(session.token().len(), TOKEN_BYTES * 2);
        assert!(session.token().bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(Uuid::parse_str(session.unique_id().as_str()).is_ok());
        assert_eq!(session.lifetime(), Some(Duration::from_secs(30)));
        assert!(manager.get_session(session.local_id()).is_some());
    }

    #[tokio::test]
    async fn test_authenticate_wrong_key_creates_nothing() {
        let manager = manager();
        let started = Arc::new(AtomicBool::new(false));
        {
            let started = Arc::clone(&started);
            manager.on_session_start(move |_| {
                started.store(true, Ordering::SeqCst);
                async { Ok(()) }
            });
        }

        let result = manager.authenticate("guess", None).await;

        assert!(matches!(result, Err(SessionError::Authentication)));
        assert!(manager.is_empty());
        assert!(!started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_authenticate_verifier_fault_is_not_an_auth_failure() {
        let manager = SessionManager::new(Arc::new(Broken), SessionConfig::default());

        let result = manager.authenticate("secret", None).await;

        assert!(matches!(result, Err(SessionError::Verification(_))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_authenticate_verifier_panic_returns_verification_error() {
        let manager = SessionManager::new(Arc::new(Panicking), SessionConfig::default());

        let result = manager.authenticate("secret", None).await;

        assert!(matches!(result, Err(SessionError::Verification(_))));
    }

    // -- start_session -----------------------------------------------------

    #[tokio::test]
    async fn test_start_session_clamps_requested_lifetime() {
        let manager = manager();

        let session = manager
            .start_session(Some(Duration::from_secs(999_999)))
            .await
            .unwrap();

        assert_eq!(session.lifetime(), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_start_session_unbounded_max_lifetime_does_not_overflow() {
        let config = SessionConfig {
            max_lifetime: Duration::MAX,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(Arc::new(FixedKey("secret")), config);

        let session = manager
            .start_session(Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();

        assert_eq!(session.lifetime(), Some(Duration::from_secs(u64::MAX)));
        assert!(session.bump().is_ok());
        assert!(session.is_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_session_concurrent_calls_get_distinct_ids() {
        let manager = manager();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.start_session(None).await })
            })
            .collect();
        let sessions: Vec<Session> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let local_ids: HashSet<_> = sessions.iter().map(Session::local_id).collect();
        let unique_ids: HashSet<_> = sessions.iter().map(|s| s.unique_id().clone()).collect();
        assert_eq!(local_ids.len(), 64);
        assert_eq!(unique_ids.len(), 64);
        assert_eq!(manager.len(), 64);
    }

    #[tokio::test]
    async fn test_start_session_exhausted_id_space_returns_error() {
        let manager =
            SessionManager::with_id_ceiling(Arc::new(FixedKey("k")), SessionConfig::default(), 2);

        manager.start_session(None).await.unwrap();
        manager.start_session(None).await.unwrap();
        let result = manager.start_session(None).await;

        assert!(matches!(result, Err(SessionError::IdSpaceExhausted)));
        assert_eq!(manager.session_ids(), vec![SessionId(1), SessionId(2)]);
    }

    #[tokio::test]
    async fn test_start_session_reuses_id_only_after_teardown() {
        let manager =
            SessionManager::with_id_ceiling(Arc::new(FixedKey("k")), SessionConfig::default(), 1);
        let first = manager.start_session(None).await.unwrap();
        assert!(manager.start_session(None).await.is_err());

        first.teardown().await;
        let second = manager.start_session(None).await.unwrap();

        assert_eq!(second.local_id(), first.local_id());
        assert_ne!(second.unique_id(), first.unique_id());
        assert!(first.token().is_empty());
        assert!(!second.token().is_empty());
    }

    #[tokio::test]
    async fn test_on_session_start_completes_before_start_session_returns() {
        let manager = manager();
        let primed = Arc::new(Mutex::new(Vec::new()));
        {
            let primed = Arc::clone(&primed);
            manager.on_session_start(move |session| {
                let primed = Arc::clone(&primed);
                async move {
                    tokio::task::yield_now().await;
                    primed.lock().unwrap().push(session.local_id());
                    Ok(())
                }
            });
        }

        let session = manager.start_session(None).await.unwrap();

        assert_eq!(*primed.lock().unwrap(), vec![session.local_id()]);
    }

    // -- Removal and on_session_end ----------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_on_session_end_runs_after_removal() {
        let manager = manager();
        let observed = Arc::new(Mutex::new(None));
        {
            let observed = Arc::clone(&observed);
            let lookup = manager.clone();
            manager.on_session_end(move |session| {
                let observed = Arc::clone(&observed);
                let still_tracked = lookup.get_session(session.local_id()).is_some();
                async move {
                    *observed.lock().unwrap() = Some((session.unique_id().clone(), still_tracked));
                    Ok(())
                }
            });
        }
        let session = manager.start_session(None).await.unwrap();

        session.teardown().await;
        assert!(manager.get_session(session.local_id()).is_none());
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            *observed.lock().unwrap(),
            Some((session.unique_id().clone(), false))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_removed_from_manager() {
        let manager = manager();
        let session = manager.start_session(Some(Duration::from_secs(2))).await.unwrap();

        time::sleep(Duration::from_secs(3)).await;

        assert!(manager.get_session(session.local_id()).is_none());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_remove_listener_deregisters_manager_listener() {
        let manager = manager();
        let started = Arc::new(AtomicBool::new(false));
        let id = {
            let started = Arc::clone(&started);
            manager.on_session_start(move |_| {
                started.store(true, Ordering::SeqCst);
                async { Ok(()) }
            })
        };

        assert!(manager.remove_listener(id));
        manager.start_session(None).await.unwrap();

        assert!(!started.load(Ordering::SeqCst));
    }

    // -- teardown_all -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_teardown_all_empties_manager_and_releases_polls() {
        let manager = manager();
        let a = manager.start_session(None).await.unwrap();
        manager.start_session(None).await.unwrap();
        let poller = {
            let a = a.clone();
            tokio::spawn(async move { a.long_poll(Duration::from_secs(20)).await })
        };
        time::sleep(Duration::from_millis(10)).await;

        manager.teardown_all().await;

        assert!(manager.is_empty());
        assert!(poller.await.unwrap().is_empty());
    }
}
