use crate::checker::{BatchSettings, EchoService};
use crate::error::{Result, SieveError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiServerConfig,
    /// Validation configuration shared by both pools
    pub checker: CheckerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Directory holding the per-pool persistence files
    pub files_dir: PathBuf,
    /// Validated set lifetime in milliseconds
    pub cache_ttl_ms: u64,
    /// Per-probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Probes in flight at once
    pub batch_size: usize,
    /// Sweeps per validation run
    pub attempts: u32,
    /// Inclusive stability threshold in [0, 1]
    pub min_stability: f64,
    /// Target size of the HTTP pool
    pub http_min_proxies: usize,
    /// Target size of the WebSocket pool
    pub websocket_min_proxies: usize,
    /// Echo backend for HTTP probes
    pub echo_service: EchoService,
    /// ws:// or wss:// endpoint used by the WebSocket probe
    pub websocket_test_url: String,
    /// Extra slack for the WebSocket safety timer in milliseconds
    pub ws_safety_margin_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let echo_name = get_env_or("ECHO_SERVICE", "postman");
        let echo_service = EchoService::from_str(&echo_name).ok_or_else(|| {
            SieveError::InvalidConfig(format!("ECHO_SERVICE has unknown value: {}", echo_name))
        })?;

        let config = Config {
            api: ApiServerConfig {
                port: get_env_parsed("API_PORT", "8080", "a valid port number")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
            },
            checker: CheckerConfig {
                files_dir: PathBuf::from(get_env_or("FILES_DIR", "files")),
                cache_ttl_ms: get_env_parsed("PROXY_CACHE_TTL", "240000", "milliseconds")?,
                probe_timeout_ms: get_env_parsed("PROBE_TIMEOUT_MS", "4000", "milliseconds")?,
                batch_size: get_env_parsed("CHECK_BATCH_SIZE", "25", "a positive number")?,
                attempts: get_env_parsed("CHECK_ATTEMPTS", "1", "a positive number")?,
                min_stability: get_env_parsed("MIN_STABILITY", "0.5", "a number")?,
                http_min_proxies: get_env_parsed("HTTP_MIN_PROXIES", "8", "a number")?,
                websocket_min_proxies: get_env_parsed("WEBSOCKET_MIN_PROXIES", "4", "a number")?,
                echo_service,
                websocket_test_url: get_env_or(
                    "WEBSOCKET_TEST_URL",
                    "wss://ws.postman-echo.com/raw",
                ),
                ws_safety_margin_ms: get_env_parsed(
                    "WS_SAFETY_MARGIN_MS",
                    "1000",
                    "milliseconds",
                )?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        config.checker.validate()?;
        Ok(config)
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

impl CheckerConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SieveError::InvalidConfig(
                "CHECK_BATCH_SIZE must be at least 1".into(),
            ));
        }
        if self.attempts == 0 {
            return Err(SieveError::InvalidConfig(
                "CHECK_ATTEMPTS must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_stability) {
            return Err(SieveError::InvalidConfig(
                "MIN_STABILITY must be between 0 and 1".into(),
            ));
        }

        let url = Url::parse(&self.websocket_test_url).map_err(|e| {
            SieveError::InvalidConfig(format!("WEBSOCKET_TEST_URL must be a valid URL: {}", e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SieveError::InvalidConfig(
                "WEBSOCKET_TEST_URL must use ws or wss".into(),
            ));
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn ws_safety_margin(&self) -> Duration {
        Duration::from_millis(self.ws_safety_margin_ms)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            timeout: Duration::from_millis(self.probe_timeout_ms),
            batch_size: self.batch_size,
            attempts: self.attempts,
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
fn get_env_parsed<T: FromStr>(key: &str, default: &str, what: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| SieveError::InvalidConfig(format!("{} must be {}", key, what)))
}
