//! Request logging middleware

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Request logging middleware
pub struct RequestLogging;

impl RequestLogging {
    /// Log request details; validation runs can take a while, so the
    /// elapsed time is part of every line
    pub async fn log_request(req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let start = Instant::now();

        debug!("{} {} - started", method, uri);

        let response = next.run(req).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status.is_server_error() {
            warn!(%method, %uri, status = status.as_u16(), elapsed_ms, "request failed");
        } else {
            info!(%method, %uri, status = status.as_u16(), elapsed_ms, "request served");
        }

        response
    }
}
