//! Echo services
//!
//! An echo service reflects the request it received back as JSON. Routing a
//! request to one through a candidate proxy both proves the proxy forwards
//! traffic and shows which headers it added on the way.

mod dadjokes;
mod postman;

pub use dadjokes::DadjokesEcho;
pub use postman::PostmanEcho;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SieveError};
use crate::models::{Endpoint, Protocol};

/// What the echo service observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EchoResponse {
    pub headers: HashMap<String, String>,
}

/// Backing echo service, one implementation per provider
///
/// Each call issues exactly one request through `proxy` with `timeout`
/// bounding the whole round trip. Retry policy belongs to the caller.
#[async_trait]
pub trait Echo: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Plain-HTTP echo url
    fn http_url(&self) -> &str;

    /// TLS echo url
    fn https_url(&self) -> &str;

    /// Pull the echoed request headers out of the provider's body
    fn extract(&self, body: Value) -> Result<EchoResponse>;

    /// Probe through a plain HTTP proxy
    async fn by_http(&self, proxy: &Endpoint, timeout: Duration) -> Result<EchoResponse> {
        let body = fetch_json(proxy, self.http_url(), timeout).await?;
        self.extract(body)
    }

    /// Probe a TLS target through a CONNECT-capable proxy
    async fn by_https(&self, proxy: &Endpoint, timeout: Duration) -> Result<EchoResponse> {
        let body = fetch_json(proxy, self.https_url(), timeout).await?;
        self.extract(body)
    }

    /// Probe through a SOCKS proxy
    async fn by_socks(&self, proxy: &Endpoint, timeout: Duration) -> Result<EchoResponse> {
        if proxy.protocol != Protocol::Socks5 {
            return Err(SieveError::UnsupportedProtocol(proxy.protocol.to_string()));
        }
        let body = fetch_json(proxy, self.https_url(), timeout).await?;
        self.extract(body)
    }
}

/// Echo provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoService {
    #[default]
    Postman,
    Dadjokes,
}

impl EchoService {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postman" | "postman-echo" => Some(Self::Postman),
            "dadjokes" | "dadjokes-online" => Some(Self::Dadjokes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postman => "postman",
            Self::Dadjokes => "dadjokes",
        }
    }
}

/// Create an echo client for the configured provider
pub fn create_echo(service: EchoService) -> Arc<dyn Echo> {
    match service {
        EchoService::Postman => Arc::new(PostmanEcho::new()),
        EchoService::Dadjokes => Arc::new(DadjokesEcho::new()),
    }
}

/// Build a one-shot client that routes every request through `proxy`
///
/// reqwest fixes the proxy when the client is built, so each attempt gets its
/// own client. Idle pooling is off: a reused connection would skip the
/// candidate's connect path on later attempts.
pub(crate) fn proxied_client(proxy: &Endpoint, timeout: Duration) -> Result<reqwest::Client> {
    let upstream = reqwest::Proxy::all(proxy.proxy_url())
        .map_err(|e| SieveError::ProbeTransport(format!("invalid proxy {}: {}", proxy, e)))?;

    reqwest::Client::builder()
        .proxy(upstream)
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .build()
        .map_err(|e| SieveError::Internal(format!("failed to build http client: {}", e)))
}

/// Map a client error onto the probe taxonomy
pub(crate) fn classify(proxy: &Endpoint, timeout: Duration, err: reqwest::Error) -> SieveError {
    if err.is_timeout() {
        SieveError::ProbeTimeout {
            proxy: proxy.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        SieveError::from(err)
    }
}

async fn fetch_json(proxy: &Endpoint, url: &str, timeout: Duration) -> Result<Value> {
    let client = proxied_client(proxy, timeout)?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify(proxy, timeout, e))?;

    debug!("Echo {} via {} answered {}", url, proxy, response.status());

    let body = response
        .bytes()
        .await
        .map_err(|e| classify(proxy, timeout, e))?;

    serde_json::from_slice(&body).map_err(|e| {
        SieveError::ProbeUnexpectedResponse(format!("echo body via {} is not json: {}", proxy, e))
    })
}

/// Flatten a JSON object of header values into strings
pub(crate) fn headers_from_value(value: &Value) -> Result<HashMap<String, String>> {
    let object = value.as_object().ok_or_else(|| {
        SieveError::ProbeUnexpectedResponse("echoed headers are not an object".to_string())
    })?;

    Ok(object
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect())
}
