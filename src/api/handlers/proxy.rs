//! Pool handlers: ad-hoc checks and validated lists

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::server::AppState;
use crate::checker::ProxyPool;
use crate::error::SieveError;
use crate::models::{AvailabilityReport, Endpoint};

#[derive(Debug, Deserialize, Default)]
pub struct ProxiesQuery {
    /// Validate against this target instead of the echo service
    pub url: Option<String>,
}

/// POST /check
pub async fn check_proxies(
    State(state): State<AppState>,
    body: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<Vec<AvailabilityReport>>, SieveError> {
    check(&state.http_pool, body).await
}

/// POST /check_websocket
pub async fn check_websocket_proxies(
    State(state): State<AppState>,
    body: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<Vec<AvailabilityReport>>, SieveError> {
    check(&state.ws_pool, body).await
}

/// GET /proxies[?url=]
pub async fn list_proxies(
    State(state): State<AppState>,
    Query(query): Query<ProxiesQuery>,
) -> Result<Json<Vec<Endpoint>>, SieveError> {
    let proxies = match query.url.as_deref().map(str::trim) {
        Some(target) if !target.is_empty() => state.http_pool.validate_against(target).await?,
        _ => state.http_pool.get_proxies().await?,
    };
    Ok(Json(proxies))
}

/// GET /proxies_websocket
pub async fn list_websocket_proxies(
    State(state): State<AppState>,
) -> Result<Json<Vec<Endpoint>>, SieveError> {
    Ok(Json(state.ws_pool.get_proxies().await?))
}

async fn check(
    pool: &Arc<ProxyPool>,
    body: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<Vec<AvailabilityReport>>, SieveError> {
    let Json(urls) = body.map_err(|e| SieveError::InvalidRequest(e.body_text()))?;
    Ok(Json(pool.check(urls).await))
}
