//! Report cache.
//!
//! Entries are replaced wholesale, never mutated. A stale entry (age past
//! its TTL) is kept for `stale_retention` so a failed refresh can still
//! serve it; after that it is evicted on read or by [`CacheStore::sweep`].

use async_trait::async_trait;
use common::{CacheError, FrequencyReport, VariantIdentifier};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached report with staleness tracking.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub report: Arc<FrequencyReport>,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(report: Arc<FrequencyReport>, ttl: Duration) -> Self {
        Self {
            report,
            stored_at: Instant::now(),
            ttl,
        }
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }
}

/// Keyed report storage with TTL semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fresh or stale entry for `id`, if still retained.
    async fn get(&self, id: &VariantIdentifier) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry`, replacing whatever was there.
    async fn set(&self, id: VariantIdentifier, entry: CacheEntry) -> Result<(), CacheError>;

    /// Returns true if an entry was removed.
    async fn delete(&self, id: &VariantIdentifier) -> Result<bool, CacheError>;

    /// Evict entries past their retention window. Returns the count removed.
    async fn sweep(&self) -> Result<usize, CacheError>;
}

/// Process-local store. Create one at startup and share it by `Arc`.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<VariantIdentifier, CacheEntry>,
    stale_retention: Duration,
}

impl MemoryCacheStore {
    pub fn new(stale_retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            stale_retention,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expired(&self, entry: &CacheEntry) -> bool {
        entry.age() >= entry.ttl.saturating_add(self.stale_retention)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, id: &VariantIdentifier) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.entries.get(id).map(|e| e.value().clone());
        match entry {
            Some(entry) if self.expired(&entry) => {
                self.entries
                    .remove_if(id, |_, current| current.stored_at == entry.stored_at);
                debug!("Evicted expired cache entry for {}", id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn set(&self, id: VariantIdentifier, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(id, entry);
        Ok(())
    }

    async fn delete(&self, id: &VariantIdentifier) -> Result<bool, CacheError> {
        Ok(self.entries.remove(id).is_some())
    }

    async fn sweep(&self) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.expired(entry));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
