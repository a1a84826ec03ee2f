//! Durable storage of the last validated set per pool

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SieveError};
use crate::models::Endpoint;

/// Previously published set and when it was written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredProxies {
    pub last_update: DateTime<Utc>,
    pub proxies: Vec<Endpoint>,
}

#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Fails with `PersistenceRead` when missing or corrupt
    async fn load(&self) -> Result<StoredProxies>;

    /// Fails with `PersistenceWrite`
    async fn save(&self, proxies: &[Endpoint]) -> Result<()>;
}

/// One JSON array of endpoints per file; the timestamp is the file mtime
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<name>_proxies.json`
    pub fn for_pool(dir: impl AsRef<Path>, name: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{}_proxies.json", name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_err(&self, e: impl std::fmt::Display) -> SieveError {
        SieveError::PersistenceRead(format!("{}: {}", self.path.display(), e))
    }

    fn write_err(&self, e: impl std::fmt::Display) -> SieveError {
        SieveError::PersistenceWrite(format!("{}: {}", self.path.display(), e))
    }
}

#[async_trait]
impl ProxyStore for JsonFileStore {
    async fn load(&self) -> Result<StoredProxies> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.read_err(e))?;
        let proxies: Vec<Endpoint> = serde_json::from_slice(&raw).map_err(|e| self.read_err(e))?;

        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| self.read_err(e))?;

        debug!("Read {} proxies from {}", proxies.len(), self.path.display());
        Ok(StoredProxies {
            last_update: DateTime::<Utc>::from(modified),
            proxies,
        })
    }

    async fn save(&self, proxies: &[Endpoint]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.write_err(e))?;
        }

        let body = serde_json::to_vec(proxies).map_err(|e| self.write_err(e))?;

        // Write then rename so a reader never sees a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.write_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.write_err(e))?;

        debug!("Wrote {} proxies to {}", proxies.len(), self.path.display());
        Ok(())
    }
}
