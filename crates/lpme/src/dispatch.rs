//! Event dispatch: routing an authenticated request to its handler.
//!
//! Every event request goes through the same four steps, in this order:
//!
//! ```text
//! 1. resolve   local id from the request        (done by the HTTP layer)
//! 2. look up   SessionManager::get_session      → UnknownSession
//! 3. validate  Session::validate, with bump     → Authentication
//! 4. invoke    the handler bound to the event   → UnknownEvent
//! ```
//!
//! Validation happens before the handler lookup, so an unauthenticated
//! client can't probe which events exist.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use lpme_protocol::SessionId;
use lpme_session::{Session, SessionError, SessionManager};

use crate::LpmeError;

/// The future an [`EventHandler`] returns.
pub type HandlerFuture = BoxFuture<'static, Result<Vec<u8>, LpmeError>>;

/// Something that can answer an event.
///
/// Implemented for every `Fn(Session, Vec<u8>) -> impl Future<Output =
/// Result<Vec<u8>, LpmeError>>`, so plain async closures work:
///
/// ```rust,ignore
/// dispatcher.on("test", |_session, body| async move { Ok(body) });
/// ```
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one request from an already-validated `session`.
    fn call(&self, session: Session, body: Vec<u8>) -> HandlerFuture;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Session, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, LpmeError>> + Send + 'static,
{
    fn call(&self, session: Session, body: Vec<u8>) -> HandlerFuture {
        self(session, body).boxed()
    }
}

/// What a request presents to prove it belongs to a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The session's local id.
    pub local_id: SessionId,
    /// The hex token issued at authentication.
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("local_id", &self.local_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Steps 2 and 3: finds the session and checks (and bumps) its token.
///
/// # Errors
/// [`SessionError::UnknownSession`] or [`SessionError::Authentication`],
/// wrapped in [`LpmeError::Session`].
pub fn authorize(
    manager: &SessionManager,
    credentials: &Credentials,
) -> Result<Session, LpmeError> {
    let Some(session) = manager.get_session(credentials.local_id) else {
        return Err(SessionError::UnknownSession(credentials.local_id).into());
    };
    if !session.validate(credentials.token.as_bytes(), true) {
        return Err(SessionError::Authentication.into());
    }
    Ok(session)
}

/// Maps event names to handlers.
///
/// Cloning is cheap and clones share one table, so handlers can be added
/// through any clone, even after the server has started. Names are stored
/// without leading or trailing slashes: `"/plrlist/join"` and
/// `"plrlist/join"` are the same event.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn EventHandler>>>>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an async closure to `event`, replacing any previous binding.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> &Self
    where
        F: Fn(Session, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, LpmeError>> + Send + 'static,
    {
        self.bind(event, handler)
    }

    /// Binds any [`EventHandler`] to `event`, replacing any previous binding.
    pub fn bind(&self, event: &str, handler: impl EventHandler) -> &Self {
        let name = normalize(event).to_string();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(handler));
        if previous.is_some() {
            tracing::debug!(event, "event handler replaced");
        }
        self
    }

    /// Unbinds `event`. Returns `false` if nothing was bound.
    pub fn remove(&self, event: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(normalize(event))
            .is_some()
    }

    /// Returns `true` if a handler is bound to `event`.
    pub fn contains(&self, event: &str) -> bool {
        self.handler(event).is_some()
    }

    /// Names of every bound event, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Runs the full dispatch sequence for one request.
    ///
    /// A handler that panics is reported as [`LpmeError::Handler`]; the
    /// panic does not escape.
    pub async fn dispatch(
        &self,
        manager: &SessionManager,
        event: &str,
        credentials: &Credentials,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, LpmeError> {
        let session = authorize(manager, credentials)?;
        let handler = self
            .handler(event)
            .ok_or_else(|| LpmeError::UnknownEvent(normalize(event).to_string()))?;

        let local_id = session.local_id();
        match AssertUnwindSafe(handler.call(session, body)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(%local_id, event, "event handler panicked");
                Err(LpmeError::handler("handler panicked"))
            }
        }
    }

    fn handler(&self, event: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(normalize(event))
            .cloned()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.events())
            .finish()
    }
}

fn normalize(event: &str) -> &str {
    event.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lpme_session::{SessionConfig, TokenVerifier};
    use tokio::time::{self, Instant};

    use super::*;

    struct RejectAll;

    impl TokenVerifier for RejectAll {
        fn verify(&self, _: &[u8]) -> Result<bool, SessionError> {
            Ok(false)
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(RejectAll), SessionConfig::default())
    }

    fn echo_dispatcher() -> EventDispatcher {
        let dispatcher = EventDispatcher::new();
        dispatcher.on("/test", |_session, body| async move { Ok(body) });
        dispatcher
    }

    fn credentials_for(session: &Session) -> Credentials {
        Credentials {
            local_id: session.local_id(),
            token: session.token(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_valid_request_reaches_handler() {
        let manager = manager();
        let session = manager.start_session(None).await.unwrap();

        let reply = echo_dispatcher()
            .dispatch(&manager, "test", &credentials_for(&session), b"ping".to_vec())
            .await
            .unwrap();

        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn test_dispatch_handler_sees_the_validated_session() {
        let manager = manager();
        let session = manager.start_session(None).await.unwrap();
        let dispatcher = EventDispatcher::new();
        dispatcher.on("whoami", |session: Session, _| async move {
            Ok(session.local_id().0.to_string().into_bytes())
        });

        let reply = dispatcher
            .dispatch(&manager, "whoami", &credentials_for(&session), Vec::new())
            .await
            .unwrap();

        assert_eq!(reply, session.local_id().0.to_string().into_bytes());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_session_returns_error() {
        let manager = manager();
        let credentials = Credentials {
            local_id: SessionId(42),
            token: "00".into(),
        };

        let result = echo_dispatcher().dispatch(&manager, "test", &credentials, Vec::new()).await;

        assert!(matches!(
            result,
            Err(LpmeError::Session(SessionError::UnknownSession(SessionId(42))))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_wrong_token_returns_authentication_error() {
        let manager = manager();
        let session = manager.start_session(None).await.unwrap();
        let credentials = Credentials {
            local_id: session.local_id(),
            token: "not the token".into(),
        };

        let result = echo_dispatcher().dispatch(&manager, "test", &credentials, Vec::new()).await;

        assert!(matches!(result, Err(LpmeError::Session(SessionError::Authentication))));
    }

    #[tokio::test]
    async fn test_dispatch_unregistered_event_checked_after_validation() {
        let manager = manager();
        let session = manager.start_session(None).await.unwrap();
        let dispatcher = echo_dispatcher();

        let bad_token = Credentials {
            local_id: session.local_id(),
            token: "nope".into(),
        };
        let unauthenticated = dispatcher
            .dispatch(&manager, "missing", &bad_token, Vec::new())
            .await;
        let authenticated = dispatcher
            .dispatch(&manager, "missing", &credentials_for(&session), Vec::new())
            .await;

        assert!(matches!(unauthenticated, Err(LpmeError::Session(SessionError::Authentication))));
        assert!(matches!(authenticated, Err(LpmeError::UnknownEvent(name)) if name == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_bumps_session_expiry() {
        let manager = manager();
        let session = manager.start_session(Some(Duration::from_secs(10))).await.unwrap();
        time::sleep(Duration::from_secs(4)).await;

        echo_dispatcher()
            .dispatch(&manager, "test", &credentials_for(&session), Vec::new())
            .await
            .unwrap();

        assert_eq!(session.expires_at(), Some(Instant::now() + Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_dispatch_panicking_handler_becomes_handler_error() {
        let manager = manager();
        let session = manager.start_session(None).await.unwrap();
        let dispatcher = EventDispatcher::new();
        dispatcher.on("boom", |_, body: Vec<u8>| async move {
            assert!(!body.is_empty(), "handler bug");
            Ok(body)
        });

        let result = dispatcher
            .dispatch(&manager, "boom", &credentials_for(&session), Vec::new())
            .await;

        assert!(matches!(result, Err(LpmeError::Handler(_))));
    }

    #[test]
    fn test_on_normalizes_slashes_and_replaces() {
        let dispatcher = echo_dispatcher();
        dispatcher.on("test/", |_, _| async { Ok(Vec::new()) });
        dispatcher.on("plrlist/join", |_, _| async { Ok(Vec::new()) });

        assert_eq!(dispatcher.events(), vec!["plrlist/join".to_string(), "test".to_string()]);
        assert!(dispatcher.contains("/plrlist/join"));
        assert!(dispatcher.remove("/test"));
        assert!(!dispatcher.contains("test"));
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let credentials = Credentials {
            local_id: SessionId(1),
            token: "s3cret".into(),
        };
        assert!(!format!("{credentials:?}").contains("s3cret"));
    }
}
