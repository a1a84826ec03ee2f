//! Proxy validation: probes, batching and the pool engine

pub mod batch;
pub mod cache;
pub mod echo;
pub mod engine;
pub mod probe;
pub mod transport;
pub mod websocket;

pub use batch::{divide_into_batches, passing, BatchOrchestrator, BatchSettings};
pub use cache::ExpiringCache;
pub use echo::{create_echo, Echo, EchoResponse, EchoService};
pub use engine::{PoolSettings, ProxyPool};
pub use probe::{EchoProbe, ProxyProbe, TargetProbe};
pub use websocket::{TunnelConnector, WebSocketProbe, WsConnector};
