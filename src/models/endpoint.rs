use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SieveError};

/// `scheme://host:port`, anything after the port segment is ignored
static ENDPOINT_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+)://([^:/\s]+):([^/\s]+)").expect("endpoint url pattern must compile")
});

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }

    /// Exact, case-sensitive match against the four recognised schemes
    pub fn from_scheme(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            "socks4" => Some(Protocol::Socks4),
            "socks5" => Some(Protocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, Protocol::Socks4 | Protocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proxy's protocol/host/port triple
///
/// Equality is exact field comparison; no case folding or normalisation
/// happens on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    /// Parse `protocol://host:port`
    ///
    /// Checks run in a fixed order so the reported error is deterministic:
    /// shape, then protocol, then port.
    pub fn parse(url: &str) -> Result<Self> {
        let caps = ENDPOINT_URL
            .captures(url.trim())
            .ok_or_else(|| SieveError::MalformedUrl(url.to_string()))?;

        let scheme = &caps[1];
        let host = &caps[2];
        let port = &caps[3];

        let protocol = Protocol::from_scheme(scheme)
            .ok_or_else(|| SieveError::UnsupportedProtocol(scheme.to_string()))?;

        let port = match port.parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => return Err(SieveError::InvalidPort(port.to_string())),
        };

        Ok(Self::new(protocol, host, port))
    }

    /// Render as `protocol://host:port`, the inverse of [`Endpoint::parse`]
    pub fn format(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// URL handed to the outbound HTTP client when routing through this proxy
    ///
    /// Public lists flag CONNECT-capable HTTP proxies as "https"; the proxy
    /// itself still speaks plain HTTP.
    pub fn proxy_url(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Http | Protocol::Https => "http",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5h",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// `host:port` for dialing the proxy directly
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

/// Remove structural duplicates, keeping the first occurrence of each
pub fn dedup_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = HashSet::with_capacity(endpoints.len());
    endpoints
        .into_iter()
        .filter(|e| seen.insert(e.clone()))
        .collect()
}
