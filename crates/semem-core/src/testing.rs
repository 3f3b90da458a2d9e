//! Test doubles shared by the unit tests in this crate.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use semem_types::backend::{BackendKind, StorageStats};
use semem_types::entry::{MemoryEntry, Metadata, ScoredEntry};
use semem_types::error::MemoryError;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::embedding::embedder::Embedder;
use crate::storage::backend::{StorageBackend, require_confirmation};
use crate::vector::rank_entries;

/// Deterministic embedder: one bucket per word, chosen by a byte sum.
pub struct KeywordEmbedder {
    dimension: usize,
}

impl KeywordEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for word in text.split_whitespace() {
            let bucket = word.bytes().map(usize::from).sum::<usize>() % self.dimension;
            v[bucket] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// `(reached, release)`: the gated call signals `reached`, then waits for
/// `release`.
pub type Gate = (Arc<Notify>, Arc<Notify>);

/// A gate that several backends can share; the first gated call takes it.
pub type GateSlot = Arc<Mutex<Option<Gate>>>;

async fn pass_gate(slot: &GateSlot) {
    let gate = slot.lock().unwrap().take();
    if let Some((reached, release)) = gate {
        reached.notify_one();
        release.notified().await;
    }
}

/// In-process backend with call counters and injectable store failures.
pub struct MockBackend {
    kind: BackendKind,
    entries: Mutex<BTreeMap<Uuid, MemoryEntry>>,
    reject: Mutex<HashSet<Uuid>>,
    list_fails_from: Mutex<Option<usize>>,
    healthy: AtomicBool,
    stats_gate: GateSlot,
    get_gate: GateSlot,
    pub get_calls: AtomicUsize,
    pub store_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_kind(BackendKind::InMemory)
    }

    pub fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(BTreeMap::new()),
            reject: Mutex::new(HashSet::new()),
            list_fails_from: Mutex::new(None),
            healthy: AtomicBool::new(true),
            stats_gate: GateSlot::default(),
            get_gate: GateSlot::default(),
            get_calls: AtomicUsize::new(0),
            store_calls: AtomicUsize::new(0),
        }
    }

    /// Make every `store` of `id` fail as if the backend were unreachable.
    pub fn reject_store(&self, id: Uuid) {
        self.reject.lock().unwrap().insert(id);
    }

    /// Make `list` fail for every page starting at or after `offset`.
    pub fn fail_list_from(&self, offset: usize) {
        *self.list_fails_from.lock().unwrap() = Some(offset);
    }

    /// Report `healthy: false` with a zero count, like an unreachable endpoint.
    pub fn set_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    /// Park the first `stats` call that finds a gate in `slot`.
    pub fn with_stats_gate(mut self, slot: GateSlot) -> Self {
        self.stats_gate = slot;
        self
    }

    /// Park a `get` that finds a gate in `slot` after it has read the entry.
    pub fn with_get_gate(mut self, slot: GateSlot) -> Self {
        self.get_gate = slot;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl StorageBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn store(&self, entry: &MemoryEntry) -> Result<Uuid, MemoryError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        entry.validate(None)?;
        if self.reject.lock().unwrap().contains(&entry.id) {
            return Err(MemoryError::unavailable("store", "injected failure").with_id(entry.id));
        }
        self.entries.lock().unwrap().insert(entry.id, entry.clone());
        Ok(entry.id)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let found = self.entries.lock().unwrap().get(id).cloned();
        pass_gate(&self.get_gate).await;
        Ok(found)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let entries = self.entries.lock().unwrap();
        Ok(rank_entries(
            entries.values(),
            query_embedding,
            k,
            min_similarity,
            type_filter,
        ))
    }

    async fn remove(&self, id: &Uuid) -> Result<bool, MemoryError> {
        Ok(self.entries.lock().unwrap().remove(id).is_some())
    }

    async fn clear(&self, confirm: bool) -> Result<u64, MemoryError> {
        require_confirmation(confirm)?;
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<StorageStats, MemoryError> {
        pass_gate(&self.stats_gate).await;
        let healthy = self.healthy.load(Ordering::SeqCst);
        Ok(StorageStats {
            count: if healthy {
                self.entries.lock().unwrap().len() as u64
            } else {
                0
            },
            size_bytes: None,
            backend_type: self.kind,
            healthy,
            cache: None,
        })
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        if self.list_fails_from.lock().unwrap().is_some_and(|from| offset >= from) {
            return Err(MemoryError::unavailable("list", "injected failure"));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_access(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), MemoryError> {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(id) {
            entry.touch(at);
        }
        Ok(())
    }
}

/// An entry with the given embedding and no metadata.
pub fn entry_with(prompt: &str, embedding: Vec<f32>) -> MemoryEntry {
    MemoryEntry::new(prompt, format!("response to {prompt}"), embedding, Metadata::new())
}

/// Factory opening a fresh `MockBackend` per descriptor.
///
/// With a gate set, `open` waits for one notification first, which lets a
/// test hold a switch in the `Switching` state. Every opened backend shares
/// `stats_gate`, so a switch can also be parked after it has taken the
/// exclusive section.
#[derive(Default)]
pub struct MockFactory {
    pub gate: Option<Arc<Notify>>,
    pub stats_gate: GateSlot,
}

impl crate::storage::factory::BackendFactory for MockFactory {
    async fn open(
        &self,
        descriptor: &semem_types::backend::BackendDescriptor,
    ) -> Result<crate::storage::box_backend::BoxStorageBackend, MemoryError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(crate::storage::box_backend::BoxStorageBackend::new(
            MockBackend::with_kind(descriptor.kind()).with_stats_gate(self.stats_gate.clone()),
        ))
    }
}
