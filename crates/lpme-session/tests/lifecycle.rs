//! End-to-end session lifecycle through the public API, using the real
//! Argon2id verifier.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lpme_session::{
    Argon2Verifier, SessionConfig, SessionError, SessionManager, SessionState, VerifierConfig,
};
use tokio::time::{self, Instant};

const KEY: &str = "correct horse battery staple";

fn cheap_params() -> VerifierConfig {
    VerifierConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

fn manager() -> SessionManager {
    let verifier = Argon2Verifier::from_key(KEY, &cheap_params()).unwrap();
    SessionManager::new(Arc::new(verifier), SessionConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_session_validated_then_left_idle_expires() {
    let manager = manager();
    let session = manager
        .authenticate(KEY, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    let token = session.token();
    let expired = Arc::new(AtomicUsize::new(0));
    {
        let expired = Arc::clone(&expired);
        session.on_expire(move |_| {
            expired.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
    }

    time::sleep(Duration::from_secs(1)).await;
    let call_time = Instant::now();
    assert!(session.validate(token.as_bytes(), true));
    assert_eq!(session.expires_at(), Some(call_time + Duration::from_secs(2)));

    time::sleep(Duration::from_secs(3)).await;

    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::TornDown);
    assert!(manager.get_session(session.local_id()).is_none());
    assert!(!session.validate(token.as_bytes(), true));
}

#[tokio::test(start_paused = true)]
async fn test_incorrect_key_is_rejected_without_a_session() {
    let manager = manager();

    let result = manager.authenticate("wrong", None).await;

    assert!(matches!(result, Err(SessionError::Authentication)));
    assert!(manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_push_then_long_poll_returns_immediately() {
    let manager = manager();
    let session = manager.authenticate(KEY, None).await.unwrap();

    session.push("hello").unwrap();
    let start = Instant::now();
    let batch = session.long_poll(Duration::from_secs(5)).await;

    assert_eq!(batch, vec![b"hello".to_vec()]);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_idle_long_poll_waits_for_ttl() {
    let manager = manager();
    let session = manager.authenticate(KEY, None).await.unwrap();

    let start = Instant::now();
    let batch = session.long_poll(Duration::from_secs(1)).await;

    assert!(batch.is_empty());
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_ordered_messages_are_delivered_once_as_one_batch() {
    let manager = manager();
    let session = manager.authenticate(KEY, None).await.unwrap();

    session.push("A").unwrap();
    session.push("B").unwrap();

    let first = session.long_poll(Duration::from_secs(1)).await;
    let second = session.long_poll(Duration::from_secs(1)).await;
    assert_eq!(first, vec![b"A".to_vec(), b"B".to_vec()]);
    assert!(second.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_every_session() {
    let manager = manager();
    let ended = Arc::new(AtomicUsize::new(0));
    {
        let ended = Arc::clone(&ended);
        manager.on_session_end(move |_| {
            ended.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
    }
    let sessions = [
        manager.authenticate(KEY, None).await.unwrap(),
        manager.authenticate(KEY, None).await.unwrap(),
        manager.authenticate(KEY, None).await.unwrap(),
    ];

    manager.teardown_all().await;
    time::sleep(Duration::from_millis(1)).await;

    assert!(manager.is_empty());
    assert_eq!(ended.load(Ordering::SeqCst), 3);
    for session in &sessions {
        assert!(session.push("late").is_err());
    }
}
