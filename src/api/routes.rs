//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        // HTTP pool
        .route("/check", post(handlers::proxy::check_proxies))
        .route("/proxies", get(handlers::proxy::list_proxies))
        // WebSocket pool
        .route(
            "/check_websocket",
            post(handlers::proxy::check_websocket_proxies),
        )
        .route(
            "/proxies_websocket",
            get(handlers::proxy::list_websocket_proxies),
        )
        .with_state(state)
}
