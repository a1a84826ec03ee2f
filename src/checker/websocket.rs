//! WebSocket reachability probe
//!
//! A proxy passes when a WebSocket handshake to a fixed echo endpoint
//! completes through it. The connector enforces the probe timeout itself; a
//! second, local safety timer (`timeout + margin`) races it so a connector
//! that never settles cannot stall its batch.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::header::{CONNECTION, HOST, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use url::Url;

use super::probe::ProxyProbe;
use super::transport::connect_tunnel;
use crate::error::{Result, SieveError};
use crate::models::{Endpoint, ProbeOutcome};

/// Default extra time granted to the connector before the local timer fires
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Lifecycle events a connection attempt can produce
#[derive(Debug)]
pub enum WsEvent {
    /// Handshake answered with 101
    Open,
    /// Handshake answered with anything but 101
    Rejected(StatusCode),
    /// Connection closed before the handshake finished
    Closed,
    /// Transport, TLS or connector timeout failure
    Failed(SieveError),
    /// Local safety timer expired
    TimerFired,
}

/// Connection state; only `Connecting` accepts events
#[derive(Debug)]
pub enum WsState {
    Connecting,
    Open,
    Closed,
    Failed(SieveError),
}

impl WsState {
    /// Apply an event; once settled, later events are ignored
    pub fn on_event(self, event: WsEvent, proxy: &Endpoint, timeout: Duration) -> WsState {
        match self {
            WsState::Connecting => match event {
                WsEvent::Open => WsState::Open,
                WsEvent::Closed => WsState::Closed,
                WsEvent::Rejected(status) => WsState::Failed(SieveError::ProbeUnexpectedResponse(
                    format!("websocket handshake via {} answered {}", proxy, status),
                )),
                WsEvent::Failed(e) => WsState::Failed(e),
                WsEvent::TimerFired => WsState::Failed(SieveError::ProbeTimeout {
                    proxy: proxy.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
            settled => settled,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, WsState::Connecting)
    }

    /// Turn the settled state into the probe result
    pub fn into_outcome(self, proxy: &Endpoint) -> Result<ProbeOutcome> {
        match self {
            WsState::Open => Ok(ProbeOutcome::available(proxy.clone(), None)),
            WsState::Closed => Err(SieveError::ProbeTransport(format!(
                "websocket via {} closed before open",
                proxy
            ))),
            WsState::Failed(e) => Err(e),
            WsState::Connecting => Err(SieveError::Internal(
                "websocket probe resolved before settling".to_string(),
            )),
        }
    }
}

/// Opens a WebSocket through a proxy and reports the first lifecycle event
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn open(&self, proxy: &Endpoint, url: &Url, timeout: Duration) -> WsEvent;
}

/// WebSocket probe against a fixed echo endpoint
pub struct WebSocketProbe<C: WsConnector> {
    connector: C,
    url: Url,
    safety_margin: Duration,
}

impl<C: WsConnector> WebSocketProbe<C> {
    pub fn new(connector: C, url: Url, safety_margin: Duration) -> Self {
        Self {
            connector,
            url,
            safety_margin,
        }
    }
}

impl WebSocketProbe<TunnelConnector> {
    /// Probe `ws_url` through HTTP CONNECT tunnels
    pub fn tunnelled(ws_url: &str, safety_margin: Duration) -> Result<Self> {
        let url = Url::parse(ws_url)?;
        if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none() {
            return Err(SieveError::MalformedUrl(ws_url.to_string()));
        }
        Ok(Self::new(TunnelConnector::new(), url, safety_margin))
    }
}

#[async_trait]
impl<C: WsConnector> ProxyProbe for WebSocketProbe<C> {
    #[instrument(skip(self, proxy), fields(proxy = %proxy, url = %self.url))]
    async fn probe(&self, proxy: &Endpoint, timeout: Duration) -> Result<ProbeOutcome> {
        if proxy.protocol.is_socks() {
            return Err(SieveError::UnsupportedProtocol(proxy.protocol.to_string()));
        }

        let attempt = self.connector.open(proxy, &self.url, timeout);
        tokio::pin!(attempt);

        // First of open/closed/error/timer wins; losing the race drops the
        // attempt, which closes its socket.
        let event = tokio::select! {
            event = &mut attempt => event,
            _ = tokio::time::sleep(timeout + self.safety_margin) => WsEvent::TimerFired,
        };

        let state = WsState::Connecting.on_event(event, proxy, timeout);
        debug!("WebSocket probe via {} settled as {:?}", proxy, state);
        state.into_outcome(proxy)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Connects through an HTTP CONNECT tunnel, adds TLS for `wss`, then performs
/// the upgrade handshake
pub struct TunnelConnector {
    tls: TlsConnector,
}

impl TunnelConnector {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn handshake(&self, proxy: &Endpoint, url: &Url) -> Result<WsEvent> {
        let host = url
            .host_str()
            .ok_or_else(|| SieveError::MalformedUrl(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| SieveError::MalformedUrl(url.to_string()))?;

        let stream = connect_tunnel(proxy, host, port).await?;

        if url.scheme() == "wss" {
            let domain = ServerName::try_from(host)
                .map_err(|e| SieveError::MalformedUrl(format!("{}: {}", host, e)))?;
            let tls = self
                .tls
                .connect(domain, stream)
                .await
                .map_err(|e| SieveError::ProbeTransport(format!("TLS via {}: {}", proxy, e)))?;
            upgrade(tls, url).await
        } else {
            upgrade(stream, url).await
        }
    }
}

impl Default for TunnelConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WsConnector for TunnelConnector {
    async fn open(&self, proxy: &Endpoint, url: &Url, timeout: Duration) -> WsEvent {
        match tokio::time::timeout(timeout, self.handshake(proxy, url)).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => WsEvent::Failed(e),
            Err(_) => WsEvent::Failed(SieveError::ProbeTimeout {
                proxy: proxy.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// RFC 6455 opening handshake over an established stream
async fn upgrade<S>(io: S, url: &Url) -> Result<WsEvent>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    let conn = conn.with_upgrades();
    tokio::pin!(conn);

    let authority = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    let path = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };

    let request = Request::builder()
        .uri(path)
        .header(HOST, authority)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_KEY, websocket_key())
        .header(SEC_WEBSOCKET_VERSION, "13")
        .body(Empty::<Bytes>::new())
        .map_err(|e| SieveError::Internal(format!("failed to build upgrade request: {}", e)))?;

    let send = sender.send_request(request);
    tokio::pin!(send);

    let response = tokio::select! {
        biased;
        response = &mut send => response?,
        closed = &mut conn => {
            if let Err(e) = closed {
                return Ok(WsEvent::Failed(SieveError::from(e)));
            }
            // A finished connection has already dispatched any response
            match send.await {
                Ok(response) => response,
                Err(_) => return Ok(WsEvent::Closed),
            }
        }
    };

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        Ok(WsEvent::Open)
    } else {
        Ok(WsEvent::Rejected(response.status()))
    }
}

fn websocket_key() -> String {
    BASE64.encode(rand::random::<[u8; 16]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct PendingConnector;

    #[async_trait]
    impl WsConnector for PendingConnector {
        async fn open(&self, _proxy: &Endpoint, _url: &Url, _timeout: Duration) -> WsEvent {
            std::future::pending().await
        }
    }

    /// Resolves with a fixed event and counts calls
    struct ScriptedConnector {
        event: fn() -> WsEvent,
        calls: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(event: fn() -> WsEvent) -> Self {
            Self {
                event,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WsConnector for ScriptedConnector {
        async fn open(&self, _proxy: &Endpoint, _url: &Url, _timeout: Duration) -> WsEvent {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.event)()
        }
    }

    fn echo_url() -> Url {
        Url::parse("wss://echo.example/raw").unwrap()
    }

    fn http_proxy() -> Endpoint {
        Endpoint::new(Protocol::Http, "127.0.0.1", 8080)
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_timer_settles_hanging_connector() {
        let probe = WebSocketProbe::new(PendingConnector, echo_url(), Duration::from_millis(500));
        let started = tokio::time::Instant::now();

        let err = probe
            .probe(&http_proxy(), Duration::from_secs(4))
            .await
            .unwrap_err();

        assert!(matches!(err, SieveError::ProbeTimeout { timeout_ms: 4000, .. }));
        assert!(started.elapsed() >= Duration::from_millis(4500));
    }

    #[tokio::test]
    async fn test_socks_fails_without_connecting() {
        let probe = WebSocketProbe::new(
            ScriptedConnector::new(|| WsEvent::Open),
            echo_url(),
            DEFAULT_SAFETY_MARGIN,
        );

        for protocol in [Protocol::Socks4, Protocol::Socks5] {
            let proxy = Endpoint::new(protocol, "127.0.0.1", 1080);
            let err = probe
                .probe(&proxy, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, SieveError::UnsupportedProtocol(_)));
        }
        assert_eq!(probe.connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connector_events_map_to_outcomes() {
        let open = WebSocketProbe::new(
            ScriptedConnector::new(|| WsEvent::Open),
            echo_url(),
            DEFAULT_SAFETY_MARGIN,
        );
        let outcome = open
            .probe(&http_proxy(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.available);

        let rejected = WebSocketProbe::new(
            ScriptedConnector::new(|| WsEvent::Rejected(StatusCode::FORBIDDEN)),
            echo_url(),
            DEFAULT_SAFETY_MARGIN,
        );
        assert!(matches!(
            rejected.probe(&http_proxy(), Duration::from_secs(1)).await,
            Err(SieveError::ProbeUnexpectedResponse(_))
        ));

        let closed = WebSocketProbe::new(
            ScriptedConnector::new(|| WsEvent::Closed),
            echo_url(),
            DEFAULT_SAFETY_MARGIN,
        );
        assert!(matches!(
            closed.probe(&http_proxy(), Duration::from_secs(1)).await,
            Err(SieveError::ProbeTransport(_))
        ));
    }

    #[test]
    fn test_state_settles_once() {
        let proxy = http_proxy();
        let timeout = Duration::from_secs(1);

        let state = WsState::Connecting.on_event(WsEvent::Open, &proxy, timeout);
        assert!(state.is_settled());

        // A late close or timer must not overturn an open
        let state = state
            .on_event(WsEvent::Closed, &proxy, timeout)
            .on_event(WsEvent::TimerFired, &proxy, timeout);
        assert!(matches!(state, WsState::Open));
        assert!(state.into_outcome(&proxy).unwrap().available);
    }

    #[test]
    fn test_tunnelled_requires_websocket_url() {
        assert!(WebSocketProbe::tunnelled("wss://ws.example/raw", DEFAULT_SAFETY_MARGIN).is_ok());
        assert!(matches!(
            WebSocketProbe::tunnelled("https://ws.example/raw", DEFAULT_SAFETY_MARGIN),
            Err(SieveError::MalformedUrl(_))
        ));
    }

    const CONNECT_OK: &[&str] = &["HTTP/1.1 200 Connection Established\r\n\r\n"];

    /// Fake CONNECT proxy that also plays the WebSocket server
    ///
    /// Each `connect_reply` chunk is written separately, 100 ms apart.
    async fn spawn_ws_proxy(
        connect_reply: &'static [&'static str],
        handshake_reply: &'static str,
    ) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];

            let n = client.read(&mut buf).await.unwrap();
            let connect = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(connect.starts_with("CONNECT echo.example:80 HTTP/1.1"));
            for (i, chunk) in connect_reply.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                client.write_all(chunk.as_bytes()).await.unwrap();
            }

            let n = client.read(&mut buf).await.unwrap();
            let upgrade = String::from_utf8_lossy(&buf[..n]).to_lowercase();
            assert!(upgrade.starts_with("get /raw http/1.1"));
            assert!(upgrade.contains("upgrade: websocket"));
            assert!(upgrade.contains("sec-websocket-version: 13"));

            client.write_all(handshake_reply.as_bytes()).await.unwrap();
            // Hold the socket open until the probe drops it
            let _ = client.read(&mut buf).await;
        });

        port
    }

    #[tokio::test]
    async fn test_tunnel_connector_opens_websocket() {
        let port = spawn_ws_proxy(
            CONNECT_OK,
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: dGVzdA==\r\n\r\n",
        )
        .await;

        let probe = WebSocketProbe::new(
            TunnelConnector::new(),
            Url::parse("ws://echo.example/raw").unwrap(),
            DEFAULT_SAFETY_MARGIN,
        );
        let proxy = Endpoint::new(Protocol::Http, "127.0.0.1", port);

        let outcome = probe.probe(&proxy, Duration::from_secs(5)).await.unwrap();
        assert!(outcome.available);
    }

    #[tokio::test]
    async fn test_tunnel_connector_reports_rejected_handshake() {
        let port = spawn_ws_proxy(
            CONNECT_OK,
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n",
        )
        .await;

        let probe = WebSocketProbe::new(
            TunnelConnector::new(),
            Url::parse("ws://echo.example/raw").unwrap(),
            DEFAULT_SAFETY_MARGIN,
        );
        let proxy = Endpoint::new(Protocol::Http, "127.0.0.1", port);

        let err = probe
            .probe(&proxy, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::ProbeUnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_tunnel_connector_waits_for_split_connect_reply() {
        let port = spawn_ws_proxy(
            &[
                "HTTP/1.1 200 Connection established\r\n",
                "Proxy-Agent: squid\r\n\r\n",
            ],
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: dGVzdA==\r\n\r\n",
        )
        .await;

        let probe = WebSocketProbe::new(
            TunnelConnector::new(),
            Url::parse("ws://echo.example/raw").unwrap(),
            DEFAULT_SAFETY_MARGIN,
        );
        let proxy = Endpoint::new(Protocol::Http, "127.0.0.1", port);

        let outcome = probe.probe(&proxy, Duration::from_secs(5)).await.unwrap();
        assert!(outcome.available);
    }
}
