//! BoxStorageBackend -- object-safe dynamic dispatch wrapper for StorageBackend.
//!
//! Same blanket-impl pattern as `BoxEmbedder`:
//! 1. `StorageBackendDyn` mirrors `StorageBackend` with boxed futures
//! 2. A blanket impl covers every `T: StorageBackend`
//! 3. `BoxStorageBackend` wraps `Box<dyn StorageBackendDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use semem_types::backend::{BackendKind, StorageStats};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use uuid::Uuid;

use super::backend::StorageBackend;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MemoryError>> + Send + 'a>>;

/// Object-safe version of [`StorageBackend`] with boxed futures.
pub trait StorageBackendDyn: Send + Sync {
    fn kind_dyn(&self) -> BackendKind;

    fn store_boxed<'a>(&'a self, entry: &'a MemoryEntry) -> BoxFuture<'a, Uuid>;

    fn get_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Option<MemoryEntry>>;

    fn search_boxed<'a>(
        &'a self,
        query_embedding: &'a [f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&'a [String]>,
    ) -> BoxFuture<'a, Vec<ScoredEntry>>;

    fn remove_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, bool>;

    fn clear_boxed(&self, confirm: bool) -> BoxFuture<'_, u64>;

    fn stats_boxed(&self) -> BoxFuture<'_, StorageStats>;

    fn list_boxed(&self, offset: usize, limit: usize) -> BoxFuture<'_, Vec<MemoryEntry>>;

    fn record_access_boxed<'a>(&'a self, id: &'a Uuid, at: DateTime<Utc>) -> BoxFuture<'a, ()>;

    fn invalidate_caches_dyn(&self);
}

impl<T: StorageBackend> StorageBackendDyn for T {
    fn kind_dyn(&self) -> BackendKind {
        self.kind()
    }

    fn store_boxed<'a>(&'a self, entry: &'a MemoryEntry) -> BoxFuture<'a, Uuid> {
        Box::pin(self.store(entry))
    }

    fn get_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Option<MemoryEntry>> {
        Box::pin(self.get(id))
    }

    fn search_boxed<'a>(
        &'a self,
        query_embedding: &'a [f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&'a [String]>,
    ) -> BoxFuture<'a, Vec<ScoredEntry>> {
        Box::pin(self.search(query_embedding, k, min_similarity, type_filter))
    }

    fn remove_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, bool> {
        Box::pin(self.remove(id))
    }

    fn clear_boxed(&self, confirm: bool) -> BoxFuture<'_, u64> {
        Box::pin(self.clear(confirm))
    }

    fn stats_boxed(&self) -> BoxFuture<'_, StorageStats> {
        Box::pin(self.stats())
    }

    fn list_boxed(&self, offset: usize, limit: usize) -> BoxFuture<'_, Vec<MemoryEntry>> {
        Box::pin(self.list(offset, limit))
    }

    fn record_access_boxed<'a>(&'a self, id: &'a Uuid, at: DateTime<Utc>) -> BoxFuture<'a, ()> {
        Box::pin(self.record_access(id, at))
    }

    fn invalidate_caches_dyn(&self) {
        self.invalidate_caches()
    }
}

/// Type-erased storage backend for runtime selection.
///
/// The memory manager holds one of these for the active descriptor, so the
/// concrete variant can change at runtime without the manager being generic
/// over it.
pub struct BoxStorageBackend {
    inner: Box<dyn StorageBackendDyn + Send + Sync>,
}

impl BoxStorageBackend {
    /// Wrap a concrete `StorageBackend` in a type-erased box.
    pub fn new<T: StorageBackend + 'static>(backend: T) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.kind_dyn()
    }

    pub async fn store(&self, entry: &MemoryEntry) -> Result<Uuid, MemoryError> {
        self.inner.store_boxed(entry).await
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        self.inner
            .search_boxed(query_embedding, k, min_similarity, type_filter)
            .await
    }

    pub async fn remove(&self, id: &Uuid) -> Result<bool, MemoryError> {
        self.inner.remove_boxed(id).await
    }

    pub async fn clear(&self, confirm: bool) -> Result<u64, MemoryError> {
        self.inner.clear_boxed(confirm).await
    }

    pub async fn stats(&self) -> Result<StorageStats, MemoryError> {
        self.inner.stats_boxed().await
    }

    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.inner.list_boxed(offset, limit).await
    }

    pub async fn record_access(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), MemoryError> {
        self.inner.record_access_boxed(id, at).await
    }

    pub fn invalidate_caches(&self) {
        self.inner.invalidate_caches_dyn()
    }

    /// Every entry, fetched page by page.
    pub async fn list_all(&self, page_size: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        loop {
            let page = self.list(all.len(), page_size).await?;
            let done = page.len() < page_size;
            all.extend(page);
            if done {
                return Ok(all);
            }
        }
    }
}

impl std::fmt::Debug for BoxStorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStorageBackend")
            .field("kind", &self.kind())
            .finish()
    }
}
