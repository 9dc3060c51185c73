//! `LpmeServer` builder and server loop.
//!
//! This is the entry point for running an LPME server. It ties together all
//! the layers: HTTP → dispatch → session → protocol.

use std::sync::Arc;

use axum::Router;
use lpme_session::{SessionConfig, SessionManager, TokenVerifier};
use tokio::net::TcpListener;

use crate::http::router;
use crate::{EventDispatcher, LpmeError, PollConfig};

/// Builder for configuring and starting an LPME server.
///
/// # Example
///
/// ```rust,ignore
/// use lpme::prelude::*;
///
/// let server = LpmeServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(Argon2Verifier::new(stored_hash)?)
///     .await?;
/// server.dispatcher().on("test", |_session, body| async move { Ok(body) });
/// server.run().await
/// ```
pub struct LpmeServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    poll_config: PollConfig,
    dispatcher: EventDispatcher,
}

impl LpmeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session_config: SessionConfig::default(),
            poll_config: PollConfig::default(),
            dispatcher: EventDispatcher::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session expiry configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the long-poll bounds.
    pub fn poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    /// Uses an existing dispatcher (and the events already bound to it).
    pub fn dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Binds the listening socket and builds the server around `verifier`.
    pub async fn build(self, verifier: impl TokenVerifier) -> Result<LpmeServer, LpmeError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|source| LpmeError::Bind {
                addr: self.bind_addr.clone(),
                source,
            })?;

        Ok(LpmeServer {
            listener,
            manager: SessionManager::new(Arc::new(verifier), self.session_config),
            dispatcher: self.dispatcher,
            poll_config: self.poll_config.validated(),
        })
    }
}

impl Default for LpmeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound LPME server.
///
/// Register events on [`dispatcher()`](Self::dispatcher) and listeners on
/// [`manager()`](Self::manager), then call [`run()`](Self::run).
pub struct LpmeServer {
    listener: TcpListener,
    manager: SessionManager,
    dispatcher: EventDispatcher,
    poll_config: PollConfig,
}

impl LpmeServer {
    /// Creates a new builder.
    pub fn builder() -> LpmeServerBuilder {
        LpmeServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// The session manager behind this server.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// The event table behind this server.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// The router this server serves, for mounting elsewhere or testing.
    pub fn router(&self) -> Router {
        router(
            self.manager.clone(),
            self.dispatcher.clone(),
            self.poll_config.clone(),
        )
    }

    /// Serves requests until the process is terminated.
    pub async fn run(self) -> Result<(), LpmeError> {
        self.run_until_shutdown(std::future::pending()).await
    }

    /// Serves requests until `signal` completes.
    ///
    /// On shutdown every session is torn down first, which releases blocked
    /// polls so in-flight requests can drain.
    pub async fn run_until_shutdown(
        self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), LpmeError> {
        let router = self.router();
        let addr = self.local_addr().map_err(LpmeError::Serve)?;
        tracing::info!(%addr, "LPME server listening");

        let manager = self.manager.clone();
        let shutdown = async move {
            signal.await;
            tracing::info!("shutdown requested, tearing down sessions");
            manager.teardown_all().await;
        };

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(LpmeError::Serve)?;

        tracing::info!("LPME server stopped");
        Ok(())
    }
}
