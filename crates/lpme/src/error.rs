//! Unified error type for LPME, and how it maps onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lpme_protocol::ProtocolError;
use lpme_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `lpme` crate you deal with this single error type instead
/// of importing errors from each sub-crate. The `#[from]` attribute on each
/// wrapped variant auto-generates `From` impls, so `?` converts sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum LpmeError {
    /// A protocol-level error (decode, framing).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (authentication, unknown or inactive session).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No handler is registered for the requested event.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The request was malformed in a way the client can fix.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An event handler failed.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl LpmeError {
    /// Shorthand for [`LpmeError::Handler`] from any displayable error.
    pub fn handler(error: impl std::fmt::Display) -> Self {
        Self::Handler(error.to_string())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(SessionError::Authentication | SessionError::UnknownSession(_)) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Session(SessionError::InactiveSession(_)) => StatusCode::GONE,
            Self::UnknownEvent(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Session(_) | Self::Handler(_) | Self::Bind { .. } | Self::Serve(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error responses never carry internal detail: credential failures get an
/// empty body, everything else a fixed reason phrase.
impl IntoResponse for LpmeError {
    fn into_response(self) -> Response {
        let status = self.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                tracing::debug!(error = %self, "request rejected");
                status.into_response()
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, "request failed");
                (status, "internal server error").into_response()
            }
            _ => {
                tracing::debug!(error = %self, "request rejected");
                let reason = status.canonical_reason().unwrap_or("error");
                (status, reason).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lpme_protocol::SessionId;

    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::TruncatedFrame { offset: 4 };
        let lpme_err: LpmeError = err.into();
        assert!(matches!(lpme_err, LpmeError::Protocol(_)));
        assert_eq!(lpme_err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::UnknownSession(SessionId(3));
        let lpme_err: LpmeError = err.into();
        assert!(matches!(lpme_err, LpmeError::Session(_)));
        assert!(lpme_err.to_string().contains("S-3"));
    }

    #[test]
    fn test_status_maps_credential_failures_to_unauthorized() {
        assert_eq!(
            LpmeError::from(SessionError::Authentication).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            LpmeError::from(SessionError::UnknownSession(SessionId(1))).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_status_maps_remaining_variants() {
        assert_eq!(
            LpmeError::from(SessionError::InactiveSession(SessionId(1))).status(),
            StatusCode::GONE
        );
        assert_eq!(LpmeError::UnknownEvent("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            LpmeError::from(SessionError::Verification("hash".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(LpmeError::handler("db down").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_into_response_hides_internal_detail() {
        let response = LpmeError::from(SessionError::Verification("argon2 params corrupt".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"internal server error");
    }

    #[tokio::test]
    async fn test_into_response_unauthorized_has_empty_body() {
        let response = LpmeError::from(SessionError::Authentication).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
