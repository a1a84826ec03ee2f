//! API server using Axum
//!
//! Serves the HTTP and WebSocket proxy pools.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::checker::ProxyPool;
use crate::config::ApiServerConfig;
use crate::error::{Result, SieveError};

use super::middleware::RequestLogging;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub http_pool: Arc<ProxyPool>,
    pub ws_pool: Arc<ProxyPool>,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(api_config: ApiServerConfig, http_pool: Arc<ProxyPool>, ws_pool: Arc<ProxyPool>) -> Self {
        Self {
            config: api_config,
            state: AppState { http_pool, ws_pool },
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(axum::middleware::from_fn(RequestLogging::log_request))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| SieveError::InvalidConfig(format!("Invalid API server address: {}", e)))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| SieveError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
