//! HTTP surface: the axum router and its request handlers.
//!
//! | Method | Path               | Does                                   |
//! |--------|--------------------|----------------------------------------|
//! | POST   | `/`                | verify key, start a session            |
//! | POST   | `/liblpme/longpoll`| drain-or-wait on the outbound queue    |
//! | POST   | `/liblpme/close`   | tear the session down                  |
//! | POST   | `/<event>`         | dispatch to the bound event handler    |
//!
//! Credentials travel in headers (see [`lpme_protocol::headers`]). Missing
//! or malformed credential headers are answered like wrong ones: 401, empty
//! body. Nothing a client sends in a header can produce a 5xx.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use lpme_protocol::headers::{CHUNK_COUNT, LIFETIME, MAX_TTL, SESSION, SESSION_ID, TOKEN};
use lpme_protocol::{AuthGrant, SessionId, encode_batch};
use lpme_session::{SessionError, SessionManager};

use crate::dispatch::{Credentials, authorize};
use crate::{EventDispatcher, LpmeError, PollConfig};

/// Path of the long-poll endpoint.
pub const LONGPOLL_PATH: &str = "/liblpme/longpoll";

/// Path of the explicit close endpoint.
pub const CLOSE_PATH: &str = "/liblpme/close";

/// Shared state handed to every handler.
struct AppState {
    manager: SessionManager,
    dispatcher: EventDispatcher,
    poll: PollConfig,
}

/// Creates the router with all routes configured.
///
/// The router is self-contained, so it can be nested under a prefix in a
/// larger application with `Router::nest`.
pub fn router(manager: SessionManager, dispatcher: EventDispatcher, poll: PollConfig) -> Router {
    let state = Arc::new(AppState {
        manager,
        dispatcher,
        poll: poll.validated(),
    });

    Router::new()
        .route("/", post(authenticate))
        .route(LONGPOLL_PATH, post(long_poll))
        .route(CLOSE_PATH, post(close))
        .route("/*event", post(event))
        .with_state(state)
}

/// POST / - Verify the presented key and start a session
async fn authenticate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, LpmeError> {
    let key = header_str(&headers, TOKEN).ok_or(SessionError::Authentication)?;
    let lifetime = headers
        .get(LIFETIME)
        .map(|raw| {
            raw.to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .ok_or_else(|| LpmeError::BadRequest("invalid lifetime header".into()))
        })
        .transpose()?;

    let session = state.manager.authenticate(key, lifetime).await?;
    let grant = AuthGrant {
        local_id: session.local_id(),
        unique_id: session.unique_id().clone(),
        token: session.token(),
    };

    let parts = [
        (HeaderName::from_static(SESSION_ID), HeaderValue::from(grant.local_id.0)),
        (
            HeaderName::from_static(SESSION),
            HeaderValue::from_str(&grant.token).map_err(LpmeError::handler)?,
        ),
    ];
    Ok((parts, Json(grant)).into_response())
}

/// POST /liblpme/longpoll - Collect queued messages, waiting if there are none
async fn long_poll(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, LpmeError> {
    let session = authorize(&state.manager, &credentials(&headers)?)?;
    let ttl = state.poll.ttl_for(header_str(&headers, MAX_TTL));

    let batch = session.long_poll(ttl).await;
    tracing::debug!(local_id = %session.local_id(), messages = batch.len(), "poll answered");

    let body = encode_batch(&batch)?;
    let parts = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
        (HeaderName::from_static(CHUNK_COUNT), HeaderValue::from(batch.len())),
    ];
    Ok((parts, body).into_response())
}

/// POST /liblpme/close - Tear the session down
async fn close(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, LpmeError> {
    let session = authorize(&state.manager, &credentials(&headers)?)?;
    session.teardown().await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /<event> - Dispatch to a registered handler
async fn event(
    State(state): State<Arc<AppState>>,
    Path(event): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Vec<u8>, LpmeError> {
    let credentials = credentials(&headers)?;
    state
        .dispatcher
        .dispatch(&state.manager, &event, &credentials, body.to_vec())
        .await
}

/// Reads the session id and token headers. Anything missing or unparsable
/// is an authentication failure.
fn credentials(headers: &HeaderMap) -> Result<Credentials, LpmeError> {
    let local_id = header_str(headers, SESSION_ID)
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .map(SessionId)
        .ok_or(SessionError::Authentication)?;
    let token = header_str(headers, SESSION).ok_or(SessionError::Authentication)?;

    Ok(Credentials {
        local_id,
        token: token.trim().to_string(),
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
