//! Validation engine: cache, seed, augment, publish

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::batch::{passing, BatchOrchestrator};
use super::cache::ExpiringCache;
use super::probe::TargetProbe;
use crate::error::Result;
use crate::models::{dedup_endpoints, AvailabilityReport, Endpoint};
use crate::sources::SourceLoader;
use crate::store::ProxyStore;

/// Pool thresholds
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Label used in logs and the persistence file name
    pub name: String,
    /// A fresh cached set smaller than this triggers a refresh
    pub min_cached: usize,
    /// Seed survivors below this pull in the source loader
    pub enough: usize,
    /// Inclusive stability threshold
    pub min_stability: f64,
}

/// One validated proxy pool with its own cache
///
/// The HTTP and WebSocket pools are separate instances; only the probe
/// strategy inside the orchestrator differs.
pub struct ProxyPool {
    settings: PoolSettings,
    cache: Mutex<ExpiringCache<Vec<Endpoint>>>,
    refresh: tokio::sync::Mutex<()>,
    orchestrator: BatchOrchestrator,
    source: Arc<dyn SourceLoader>,
    store: Arc<dyn ProxyStore>,
}

impl ProxyPool {
    pub fn new(
        settings: PoolSettings,
        cache_ttl: Duration,
        orchestrator: BatchOrchestrator,
        source: Arc<dyn SourceLoader>,
        store: Arc<dyn ProxyStore>,
    ) -> Self {
        Self {
            settings,
            cache: Mutex::new(ExpiringCache::new(cache_ttl)),
            refresh: tokio::sync::Mutex::new(()),
            orchestrator,
            source,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn last_update(&self) -> Option<tokio::time::Instant> {
        self.cache.lock().last_update()
    }

    /// Current validated set, refreshing it when the cache cannot serve
    #[instrument(skip(self), fields(pool = %self.settings.name, run_id = %Uuid::new_v4()))]
    pub async fn get_proxies(&self) -> Result<Vec<Endpoint>> {
        let seen = {
            let cache = self.cache.lock();
            if let Some(cached) = self.usable(&cache) {
                info!("Serving {} cached proxies", cached.len());
                return Ok(cached);
            }
            cache.last_update()
        };

        let _guard = self.refresh.lock().await;

        // Someone else refreshed while we waited on the guard
        let concurrent = {
            let cache = self.cache.lock();
            if cache.last_update() != seen {
                cache.data().cloned()
            } else {
                None
            }
        };
        if let Some(data) = concurrent {
            info!("Serving {} proxies refreshed by a concurrent run", data.len());
            return Ok(data);
        }

        let validated = self.collect(&self.orchestrator).await;

        self.cache.lock().update(validated.clone());
        if let Err(e) = self.store.save(&validated).await {
            warn!("Failed to persist validated proxies: {}", e);
        }

        info!("Published {} validated proxies", validated.len());
        Ok(validated)
    }

    /// Candidates that can reach `target` through themselves
    ///
    /// Scoped to one target, so neither the cache nor persistence is touched.
    #[instrument(skip(self), fields(pool = %self.settings.name, run_id = %Uuid::new_v4()))]
    pub async fn validate_against(&self, target: &str) -> Result<Vec<Endpoint>> {
        let probe = TargetProbe::new(target)?;
        let orchestrator =
            BatchOrchestrator::new(Arc::new(probe), self.orchestrator.settings().clone());

        let validated = self.collect(&orchestrator).await;
        info!("{} proxies reach {}", validated.len(), target);
        Ok(validated)
    }

    /// Single-attempt availability of exactly the supplied urls
    ///
    /// Entries that do not parse are logged and left out of the report.
    #[instrument(skip(self, urls), fields(pool = %self.settings.name, count = urls.len()))]
    pub async fn check(&self, urls: Vec<String>) -> Vec<AvailabilityReport> {
        let candidates: Vec<Endpoint> = urls
            .iter()
            .filter_map(|url| match Endpoint::parse(url) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!("Skipping candidate {:?}: {}", url, e);
                    None
                }
            })
            .collect();

        self.orchestrator
            .single_attempt()
            .run(&candidates)
            .await
            .iter()
            .map(AvailabilityReport::from)
            .collect()
    }

    fn usable(&self, cache: &ExpiringCache<Vec<Endpoint>>) -> Option<Vec<Endpoint>> {
        cache
            .data()
            .filter(|data| data.len() >= self.settings.min_cached)
            .cloned()
    }

    /// Seed from persistence, top up from the source, dedup
    async fn collect(&self, orchestrator: &BatchOrchestrator) -> Vec<Endpoint> {
        let seed = match self.store.load().await {
            Ok(stored) => {
                info!(
                    "Loaded {} persisted proxies written at {}",
                    stored.proxies.len(),
                    stored.last_update
                );
                stored.proxies
            }
            Err(e) => {
                warn!("No usable seed, starting empty: {}", e);
                Vec::new()
            }
        };

        let mut validated = self.validate(orchestrator, seed).await;

        if validated.len() < self.settings.enough {
            info!(
                "{} seed proxies passed, below {}; loading from {}",
                validated.len(),
                self.settings.enough,
                self.source.name()
            );

            let fresh = match self.source.load().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Source {} failed: {}", self.source.name(), e);
                    Vec::new()
                }
            };
            validated.extend(self.validate(orchestrator, fresh).await);
        }

        dedup_endpoints(validated)
    }

    async fn validate(
        &self,
        orchestrator: &BatchOrchestrator,
        candidates: Vec<Endpoint>,
    ) -> Vec<Endpoint> {
        let candidates = dedup_endpoints(candidates);
        if candidates.is_empty() {
            return Vec::new();
        }

        let records = orchestrator.run(&candidates).await;
        passing(&records, self.settings.min_stability)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{Result, SieveError};
    use crate::models::Endpoint;
    use crate::sources::SourceLoader;
    use crate::store::{ProxyStore, StoredProxies};

    #[derive(Default)]
    pub struct StaticSource {
        pub proxies: Vec<Endpoint>,
        pub fail: bool,
        pub loads: AtomicUsize,
    }

    impl StaticSource {
        pub fn new(proxies: Vec<Endpoint>) -> Self {
            Self {
                proxies,
                ..Default::default()
            }
        }

        pub fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceLoader for StaticSource {
        async fn load(&self) -> Result<Vec<Endpoint>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SieveError::SourceLoad("static source down".into()));
            }
            Ok(self.proxies.clone())
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    /// In-memory store; `None` seed behaves like a missing file
    #[derive(Default)]
    pub struct MemoryStore {
        pub seed: Mutex<Option<Vec<Endpoint>>>,
        pub saves: Mutex<Vec<Vec<Endpoint>>>,
        pub fail_save: bool,
    }

    impl MemoryStore {
        pub fn seeded(proxies: Vec<Endpoint>) -> Self {
            Self {
                seed: Mutex::new(Some(proxies)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ProxyStore for MemoryStore {
        async fn load(&self) -> Result<StoredProxies> {
            match self.seed.lock().clone() {
                Some(proxies) => Ok(StoredProxies {
                    last_update: Utc::now(),
                    proxies,
                }),
                None => Err(SieveError::PersistenceRead("no such file".into())),
            }
        }

        async fn save(&self, proxies: &[Endpoint]) -> Result<()> {
            if self.fail_save {
                return Err(SieveError::PersistenceWrite("disk full".into()));
            }
            self.saves.lock().push(proxies.to_vec());
            Ok(())
        }
    }
}
