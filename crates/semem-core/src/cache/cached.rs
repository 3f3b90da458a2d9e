//! Read-through cache in front of any storage backend.
//!
//! Reads check the cache first and populate it on a miss. Writes go to the
//! inner backend first; only after the durable write succeeds is the cached
//! copy for that id dropped, so the next read fetches what was persisted.
//!
//! A miss that raced with a write must not put what it fetched: the read may
//! have seen the value from before the write. Every write bumps a counter
//! under the cache lock and a miss only populates the cache when the counter
//! is unchanged since it started.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use semem_types::backend::{BackendKind, CacheStats, StorageStats};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use tracing::debug;
use uuid::Uuid;

use super::lru::LruCache;
use crate::storage::backend::{StorageBackend, require_confirmation};

/// A backend wrapped with an LRU entry cache and hit/miss counters.
pub struct CachedBackend<B> {
    inner: B,
    cache: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheState {
    entries: LruCache<Uuid, MemoryEntry>,
    /// Completed writes; compared by in-flight misses before they populate.
    writes: u64,
}

impl CacheState {
    /// Drop `id` (or everything) after a durable write.
    fn written(&mut self, id: Option<&Uuid>) {
        self.writes = self.writes.wrapping_add(1);
        match id {
            Some(id) => {
                self.entries.remove(id);
            }
            None => self.entries.clear(),
        }
    }
}

impl<B: StorageBackend> CachedBackend<B> {
    pub fn new(inner: B, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                writes: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Current hit/miss counters and occupancy.
    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: cache.entries.len(),
            capacity: cache.entries.capacity(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: StorageBackend> StorageBackend for CachedBackend<B> {
    fn kind(&self) -> BackendKind {
        match self.inner.kind() {
            BackendKind::TripleStore => BackendKind::CachedTripleStore,
            other => other,
        }
    }

    async fn store(&self, entry: &MemoryEntry) -> Result<Uuid, MemoryError> {
        let id = self.inner.store(entry).await?;
        self.lock().written(Some(&id));
        Ok(id)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        let writes_before = {
            let mut cache = self.lock();
            if let Some(entry) = cache.entries.get(id).cloned() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry));
            }
            cache.writes
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        let fetched = self.inner.get(id).await?;
        if let Some(entry) = &fetched {
            let mut cache = self.lock();
            if cache.writes != writes_before {
                debug!(id = %id, "write raced with cache fill, not caching");
            } else if let Some(evicted) = cache.entries.put(entry.id, entry.clone()) {
                debug!(evicted = %evicted, "cache evicted least recently used entry");
            }
        }
        Ok(fetched)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        self.inner
            .search(query_embedding, k, min_similarity, type_filter)
            .await
    }

    async fn remove(&self, id: &Uuid) -> Result<bool, MemoryError> {
        let removed = self.inner.remove(id).await?;
        self.lock().written(Some(id));
        Ok(removed)
    }

    async fn clear(&self, confirm: bool) -> Result<u64, MemoryError> {
        require_confirmation(confirm)?;
        let removed = self.inner.clear(true).await?;
        self.lock().written(None);
        Ok(removed)
    }

    async fn stats(&self) -> Result<StorageStats, MemoryError> {
        let mut stats = self.inner.stats().await?;
        stats.backend_type = self.kind();
        stats.cache = Some(self.cache_stats());
        Ok(stats)
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.inner.list(offset, limit).await
    }

    async fn record_access(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), MemoryError> {
        self.inner.record_access(id, at).await?;
        let mut cache = self.lock();
        cache.writes = cache.writes.wrapping_add(1);
        if let Some(cached) = cache.entries.peek_mut(id) {
            cached.touch(at);
        }
        Ok(())
    }

    fn invalidate_caches(&self) {
        self.lock().written(None);
        self.inner.invalidate_caches();
    }
}
