//! Probe strategies consumed by the batch orchestrator

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::echo::{classify, proxied_client, Echo};
use crate::error::{Result, SieveError};
use crate::models::{Endpoint, ProbeOutcome, Protocol};

/// Strategy deciding whether one endpoint is usable right now
///
/// An `Err` is a failed attempt; the orchestrator counts it as a non-success.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, proxy: &Endpoint, timeout: Duration) -> Result<ProbeOutcome>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Probes through an echo service, picking the variant by proxy protocol
pub struct EchoProbe {
    echo: Arc<dyn Echo>,
}

impl EchoProbe {
    pub fn new(echo: Arc<dyn Echo>) -> Self {
        Self { echo }
    }
}

#[async_trait]
impl ProxyProbe for EchoProbe {
    #[instrument(skip(self, proxy), fields(proxy = %proxy, echo = self.echo.name()))]
    async fn probe(&self, proxy: &Endpoint, timeout: Duration) -> Result<ProbeOutcome> {
        let response = match proxy.protocol {
            Protocol::Http => self.echo.by_http(proxy, timeout).await?,
            Protocol::Https => self.echo.by_https(proxy, timeout).await?,
            Protocol::Socks4 | Protocol::Socks5 => self.echo.by_socks(proxy, timeout).await?,
        };

        debug!("Proxy {} echoed {} headers", proxy, response.headers.len());
        Ok(ProbeOutcome::available(proxy.clone(), Some(response.headers)))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Direct reachability check of one caller-supplied url through the proxy
pub struct TargetProbe {
    url: url::Url,
}

impl TargetProbe {
    /// Only absolute http(s) urls are accepted
    pub fn new(target: &str) -> Result<Self> {
        let url = url::Url::parse(target)?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(Self { url }),
            _ => Err(SieveError::MalformedUrl(target.to_string())),
        }
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

#[async_trait]
impl ProxyProbe for TargetProbe {
    #[instrument(skip(self, proxy), fields(proxy = %proxy, target = %self.url))]
    async fn probe(&self, proxy: &Endpoint, timeout: Duration) -> Result<ProbeOutcome> {
        if proxy.protocol == Protocol::Socks4 {
            return Err(SieveError::UnsupportedProtocol(proxy.protocol.to_string()));
        }

        let client = proxied_client(proxy, timeout)?;
        let response = client
            .head(self.url.clone())
            .send()
            .await
            .map_err(|e| classify(proxy, timeout, e))?;

        debug!("Target answered {} via {}", response.status(), proxy);
        Ok(ProbeOutcome::available(proxy.clone(), None))
    }

    fn name(&self) -> &'static str {
        "target"
    }
}
