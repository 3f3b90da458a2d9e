//! Storage backend trait.

use chrono::{DateTime, Utc};
use semem_types::backend::{BackendKind, StorageStats};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use uuid::Uuid;

/// Durable record of memory entries.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in semem-infra; `CachedBackend` in this crate wraps
/// any of them.
pub trait StorageBackend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Persist an entry, replacing any entry with the same id.
    ///
    /// Fails with `Validation` when required fields are missing.
    fn store(
        &self,
        entry: &MemoryEntry,
    ) -> impl std::future::Future<Output = Result<Uuid, MemoryError>> + Send;

    /// Fetch an entry by id. A missing id is `Ok(None)`, not an error.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<MemoryEntry>, MemoryError>> + Send;

    /// Rank stored entries against a query embedding.
    fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredEntry>, MemoryError>> + Send;

    /// Delete an entry; returns whether it existed.
    fn remove(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, MemoryError>> + Send;

    /// Delete every entry. Requires `confirm == true`; returns how many were removed.
    fn clear(
        &self,
        confirm: bool,
    ) -> impl std::future::Future<Output = Result<u64, MemoryError>> + Send;

    /// Count, size and health snapshot.
    fn stats(&self) -> impl std::future::Future<Output = Result<StorageStats, MemoryError>> + Send;

    /// A page of entries in ascending id order.
    ///
    /// Ids are time-sortable, so pages come out in creation order and stay
    /// stable while the backend is not written to.
    fn list(
        &self,
        offset: usize,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<MemoryEntry>, MemoryError>> + Send;

    /// Apply one retrieval hit to the entry's access bookkeeping.
    ///
    /// Unknown ids are ignored.
    fn record_access(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), MemoryError>> + Send;

    /// Drop any cached state. Called when the backend stops being active.
    fn invalidate_caches(&self) {}
}

/// Reject an unconfirmed `clear`.
pub fn require_confirmation(confirm: bool) -> Result<(), MemoryError> {
    if confirm {
        Ok(())
    } else {
        Err(MemoryError::Validation(
            "clear requires explicit confirmation".to_string(),
        ))
    }
}
