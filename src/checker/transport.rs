//! Tunnels through a candidate proxy
//!
//! Used by probes that need a raw byte stream to the target rather than a
//! full HTTP client, such as the WebSocket handshake.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, SieveError};
use crate::models::Endpoint;

const MAX_CONNECT_REPLY: usize = 8192;

/// Open an HTTP CONNECT tunnel to `target_host:target_port` through `proxy`
pub async fn connect_tunnel(
    proxy: &Endpoint,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    if !proxy.protocol.is_http() {
        return Err(SieveError::UnsupportedProtocol(proxy.protocol.to_string()));
    }

    connect_via_http_proxy(proxy, target_host, target_port)
        .await
        .map_err(|e| {
            SieveError::ProbeTransport(format!(
                "CONNECT via {} to {} failed: {}",
                proxy,
                format_connect_authority(target_host, target_port),
                e
            ))
        })
}

async fn connect_via_http_proxy(
    proxy: &Endpoint,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let mut stream = TcpStream::connect(format_tcp_addr(&proxy.host, proxy.port)).await?;

    let authority = format_connect_authority(target_host, target_port);
    let request = format!(
        "CONNECT {} HTTP/1.1\r\nHost: {}\r\nProxy-Connection: keep-alive\r\n\r\n",
        authority, authority
    );
    stream.write_all(request.as_bytes()).await?;

    let head = read_connect_reply(&mut stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
        anyhow::bail!("CONNECT refused: {}", status_line);
    }

    debug!("CONNECT tunnel via {} to {} established", proxy, authority);
    Ok(stream)
}

/// Read the proxy's reply head up to and including the blank line
///
/// Reads byte by byte so nothing past the head is taken off the socket; the
/// first tunnelled byte stays there for the caller.
async fn read_connect_reply(
    stream: &mut TcpStream,
) -> std::result::Result<String, anyhow::Error> {
    let mut head = Vec::with_capacity(256);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_REPLY {
            anyhow::bail!("CONNECT reply exceeds {} bytes", MAX_CONNECT_REPLY);
        }
        match stream.read_u8().await {
            Ok(byte) => head.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if head.is_empty() {
                    anyhow::bail!("empty CONNECT response");
                }
                anyhow::bail!("connection closed inside CONNECT reply");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn format_connect_authority(host: &str, port: u16) -> String {
    format_tcp_addr(host, port)
}
