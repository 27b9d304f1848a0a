//! HTTP server: shared state, route table and graceful shutdown

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use super::api;
use super::messages::messages_handler;
use crate::config::Config;
use crate::error::{Result, TollgateError};
use crate::provider::ProviderRegistry;
use crate::router::AgentRouter;
use crate::storage::RequestStore;

/// Shared application state for all handlers
pub struct AppState {
    pub config: Config,
    /// Provider name -> client
    pub registry: ProviderRegistry,
    /// Immutable routing table built at startup
    pub router: Arc<AgentRouter>,
    pub store: Arc<dyn RequestStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: ProviderRegistry,
        router: Arc<AgentRouter>,
        store: Arc<dyn RequestStore>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            store,
        }
    }
}

/// The proxy server
pub struct ProxyServer {
    state: Arc<AppState>,
}

impl ProxyServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Bind the listen address and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| TollgateError::Config(format!("Invalid listen address: {e}")))?;

        let app = create_router(Arc::clone(&self.state));

        tracing::info!("Starting proxy server on {addr}");
        tracing::info!("Providers: {}", self.state.registry.names().join(", "));
        if self.state.config.subagents.enable {
            tracing::info!("Subagent routing: {} agents loaded", self.state.router.agents().len());
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TollgateError::General(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| TollgateError::General(format!("Server error: {e}")))?;

        tracing::info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_body_bytes;

    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/v1/chat/completions", post(api::chat_completions_handler))
        .route("/v1/models", get(api::models_handler))
        .route("/health", get(api::health_handler))
        .route(
            "/api/requests",
            get(api::list_requests_handler).delete(api::clear_requests_handler),
        )
        .route("/api/requests/summary", get(api::request_summaries_handler))
        .route("/api/requests/{id}", get(api::get_request_handler))
        .route("/api/stats", get(api::stats_handler))
        .fallback(api::not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
