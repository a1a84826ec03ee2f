//! Proxy Sieve - public proxy discovery and validation
//!
//! Keeps two pools of currently reachable third-party proxies (plain HTTP
//! and WebSocket-capable) and serves them over a small HTTP API.
//!
//! ## Features
//!
//! - HTTP, HTTPS and SOCKS5 proxies probed through echo services
//! - WebSocket handshake probing through HTTP CONNECT tunnels
//! - Attempt-based stability scoring with bounded concurrency
//! - Expiring in-memory cache backed by per-pool JSON files
//! - On-demand validation against a caller supplied target url

pub mod api;
pub mod checker;
pub mod config;
pub mod error;
pub mod models;
pub mod sources;
pub mod store;

pub use config::Config;
pub use error::{Result, SieveError};
