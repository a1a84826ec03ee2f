//! Liveness endpoints

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Plain-text greeting on `/`
pub async fn root() -> &'static str {
    "hi"
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxy-sieve"
        })),
    )
}
