//! services/api/src/adapters/geo_cache.rs
//!
//! In-memory implementation of the `GeoCacheStore` port with per-entry expiry.

use async_trait::async_trait;
use conversation_analytics_core::ports::{GeoCacheStore, PortResult};
use conversation_analytics_core::retention::ScheduledJob;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe kb id -> location cache. Expired entries are dropped lazily on read
/// and in bulk by [`InMemoryGeoCache::purge_expired`].
#[derive(Clone)]
pub struct InMemoryGeoCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl InMemoryGeoCache {
    pub fn new(ttl: Duration) -> Self {
        info!("Initializing geo cache with a TTL of {:?}", ttl);
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes the entry for `kb_id` only if it is still expired, so a value
    /// written since it was read survives.
    fn evict_if_expired(&self, kb_id: &str) -> bool {
        let evicted = self
            .entries
            .remove_if(kb_id, |_, entry| entry.is_expired())
            .is_some();
        if evicted {
            debug!("Geo cache entry for kb {} expired", kb_id);
        }
        evicted
    }

    /// Removes every expired entry, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl GeoCacheStore for InMemoryGeoCache {
    async fn get(&self, kb_id: &str) -> PortResult<Option<String>> {
        let Some(entry) = self.entries.get(kb_id) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry); // Release the read lock before removing.
            self.evict_if_expired(kb_id);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, kb_id: &str, value: &str) -> PortResult<()> {
        self.entries.insert(
            kb_id.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ScheduledJob for InMemoryGeoCache {
    async fn on_tick(&self) {
        let purged = self.purge_expired();
        if purged > 0 {
            info!("Purged {} expired geo cache entries", purged);
        }
    }
}
