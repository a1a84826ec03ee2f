use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy sieve
#[derive(Error, Debug)]
pub enum SieveError {
    // Endpoint parsing errors
    #[error("Malformed url: {0}")]
    MalformedUrl(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    // Probe errors
    #[error("Probe through {proxy} timed out after {timeout_ms}ms")]
    ProbeTimeout { proxy: String, timeout_ms: u64 },

    #[error("Probe transport failed: {0}")]
    ProbeTransport(String),

    #[error("Unexpected probe response: {0}")]
    ProbeUnexpectedResponse(String),

    // Collaborator errors
    #[error("Proxy source failed: {0}")]
    SourceLoad(String),

    #[error("Failed to read saved proxies: {0}")]
    PersistenceRead(String),

    #[error("Failed to save proxies: {0}")]
    PersistenceWrite(String),

    // Run control
    #[error("Validation run cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for sieve operations
pub type Result<T> = std::result::Result<T, SieveError>;

impl SieveError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            SieveError::InvalidRequest(_)
            | SieveError::MalformedUrl(_)
            | SieveError::UnsupportedProtocol(_)
            | SieveError::InvalidPort(_) => StatusCode::BAD_REQUEST,

            // Everything else reaching the HTTP boundary is unexpected
            SieveError::ProbeTimeout { .. }
            | SieveError::ProbeTransport(_)
            | SieveError::ProbeUnexpectedResponse(_)
            | SieveError::SourceLoad(_)
            | SieveError::PersistenceRead(_)
            | SieveError::PersistenceWrite(_)
            | SieveError::Cancelled
            | SieveError::InvalidConfig(_)
            | SieveError::Io(_)
            | SieveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Probe failures are expected per candidate and never fatal for a run
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            SieveError::ProbeTimeout { .. }
                | SieveError::ProbeTransport(_)
                | SieveError::ProbeUnexpectedResponse(_)
                | SieveError::UnsupportedProtocol(_)
        )
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for SieveError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = json!({
            "msg": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for SieveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SieveError::ProbeUnexpectedResponse(err.to_string())
        } else {
            SieveError::ProbeTransport(err.to_string())
        }
    }
}

impl From<hyper::Error> for SieveError {
    fn from(err: hyper::Error) -> Self {
        SieveError::ProbeTransport(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for SieveError {
    fn from(err: url::ParseError) -> Self {
        SieveError::MalformedUrl(err.to_string())
    }
}
