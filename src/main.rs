//! Proxy Sieve - Entry Point
//!
//! Wires both proxy pools into the API server with graceful shutdown support.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxy_sieve::api::ApiServer;
use proxy_sieve::checker::{
    create_echo, BatchOrchestrator, EchoProbe, PoolSettings, ProxyPool, WebSocketProbe,
};
use proxy_sieve::config::{CheckerConfig, LogConfig};
use proxy_sieve::sources::{FreeProxyListNet, SourceLoader};
use proxy_sieve::store::JsonFileStore;
use proxy_sieve::{Config, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting proxy-sieve");

    let source: Arc<dyn SourceLoader> = Arc::new(FreeProxyListNet::new()?);
    let http_pool = Arc::new(build_http_pool(&config.checker, source.clone()));
    let ws_pool = Arc::new(build_websocket_pool(&config.checker, source)?);
    info!(
        "Pools ready - echo: {}, websocket target: {}, files: {}",
        config.checker.echo_service.as_str(),
        config.checker.websocket_test_url,
        config.checker.files_dir.display()
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_server = ApiServer::new(config.api.clone(), http_pool, ws_pool);
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(shutdown_rx).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started - API: {}", config.api_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, api_task).await.is_err() {
        error!("API server did not stop within {:?}", SHUTDOWN_GRACE);
    }

    info!("proxy-sieve stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("proxy_sieve={},tower_http=info", log.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_http_pool(checker: &CheckerConfig, source: Arc<dyn SourceLoader>) -> ProxyPool {
    let probe = Arc::new(EchoProbe::new(create_echo(checker.echo_service)));

    ProxyPool::new(
        PoolSettings {
            name: "http".into(),
            min_cached: checker.http_min_proxies,
            enough: checker.http_min_proxies,
            min_stability: checker.min_stability,
        },
        checker.cache_ttl(),
        BatchOrchestrator::new(probe, checker.batch_settings()),
        source,
        Arc::new(JsonFileStore::for_pool(&checker.files_dir, "http")),
    )
}

fn build_websocket_pool(
    checker: &CheckerConfig,
    source: Arc<dyn SourceLoader>,
) -> Result<ProxyPool> {
    let probe = Arc::new(WebSocketProbe::tunnelled(
        &checker.websocket_test_url,
        checker.ws_safety_margin(),
    )?);

    Ok(ProxyPool::new(
        PoolSettings {
            name: "websocket".into(),
            min_cached: checker.websocket_min_proxies,
            enough: checker.websocket_min_proxies,
            min_stability: checker.min_stability,
        },
        checker.cache_ttl(),
        BatchOrchestrator::new(probe, checker.batch_settings()),
        source,
        Arc::new(JsonFileStore::for_pool(&checker.files_dir, "websocket")),
    ))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
