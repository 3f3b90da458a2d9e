//! Process-memory storage backend.
//!
//! Entries live in a `DashMap` keyed by id. Nothing survives a restart; this
//! is the default backend and the one tests run against.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use semem_core::storage::backend::{StorageBackend, require_confirmation};
use semem_core::vector::rank_entries;
use semem_types::backend::{BackendKind, StorageStats};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: DashMap<Uuid, MemoryEntry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sorted_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

impl StorageBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn store(&self, entry: &MemoryEntry) -> Result<Uuid, MemoryError> {
        entry.validate(None)?;
        self.entries.insert(entry.id, entry.clone());
        Ok(entry.id)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let snapshot: Vec<MemoryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        Ok(rank_entries(
            &snapshot,
            query_embedding,
            k,
            min_similarity,
            type_filter,
        ))
    }

    async fn remove(&self, id: &Uuid) -> Result<bool, MemoryError> {
        Ok(self.entries.remove(id).is_some())
    }

    async fn clear(&self, confirm: bool) -> Result<u64, MemoryError> {
        require_confirmation(confirm)?;
        let removed = self.entries.len() as u64;
        self.entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<StorageStats, MemoryError> {
        let size_bytes = self
            .entries
            .iter()
            .map(|e| serde_json::to_vec(e.value()).map(|v| v.len() as u64))
            .sum::<Result<u64, _>>()?;
        Ok(StorageStats {
            count: self.entries.len() as u64,
            size_bytes: Some(size_bytes),
            backend_type: BackendKind::InMemory,
            healthy: true,
            cache: None,
        })
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        Ok(self
            .sorted_ids()
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.entries.get(&id).map(|e| e.value().clone()))
            .collect())
    }

    async fn record_access(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), MemoryError> {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.touch(at);
        }
        Ok(())
    }
}
