//! Candidate proxy sources

mod free_proxy_list;

pub use free_proxy_list::FreeProxyListNet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Endpoint;

/// Fetches a fresh batch of unvalidated candidates
///
/// Called on every refresh that needs augmentation; implementations may
/// cache internally but callers do not rely on it.
#[async_trait]
pub trait SourceLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Endpoint>>;

    fn name(&self) -> &'static str;
}
