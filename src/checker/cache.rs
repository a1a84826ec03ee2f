//! Time-boxed memoization cell

use std::time::Duration;

use tokio::time::Instant;

/// Holds the last computed value and treats it as absent once `ttl` has
/// elapsed since the last [`ExpiringCache::update`].
///
/// Not synchronised; callers serialise access.
#[derive(Debug)]
pub struct ExpiringCache<T> {
    ttl: Duration,
    last_update: Option<Instant>,
    data: Option<T>,
}

impl<T> ExpiringCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_update: None,
            data: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `now - last_update > ttl`; a cache that was never updated is expired
    pub fn is_expired(&self) -> bool {
        match self.last_update {
            Some(at) => at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// The stored value while fresh, `None` once expired
    ///
    /// An expired value stays in place; only `update` replaces it.
    pub fn data(&self) -> Option<&T> {
        if self.is_expired() {
            None
        } else {
            self.data.as_ref()
        }
    }

    /// When the value was last replaced, kept for diagnostics even after expiry
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn update(&mut self, data: T) {
        self.data = Some(data);
        self.last_update = Some(Instant::now());
    }
}
