//! MemoryManager -- top-level facade of the memory engine.
//!
//! Owns the active backend descriptor, the storage backend opened for it and
//! the vector index built over that backend. Ordinary operations take the
//! shared side of an async `RwLock`; switching, migrating, restoring and
//! clearing take the exclusive side, so an in-flight store or retrieve always
//! completes against one backend before a switch can replace it.
//!
//! Switching is a small state machine (`Idle -> Switching -> Idle`). A second
//! switch or migration started while one is running fails fast with
//! `ConcurrentSwitch` instead of queueing behind it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::join_all;
use semem_types::backend::{BackendDescriptor, StorageStats};
use semem_types::backup::{BackupFormat, MergeStrategy, MigrationReport, RestoreReport};
use semem_types::config::MemoryConfig;
use semem_types::context::ContextConfig;
use semem_types::entry::{MemoryEntry, Metadata, ScoredEntry};
use semem_types::error::MemoryError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backup::{BackupDocument, create_backup, restore_backup};
use crate::context::window::ContextWindowManager;
use crate::embedding::box_embedder::BoxEmbedder;
use crate::migration::{MigrationPlan, ProgressFn, migrate};
use crate::storage::backend::require_confirmation;
use crate::storage::box_backend::BoxStorageBackend;
use crate::storage::factory::BackendFactory;
use crate::vector::VectorIndex;

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

/// Engine-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Embedding dimension every stored vector must have.
    pub dimension: usize,
    /// Page size used when streaming entries out of a backend.
    pub page_size: usize,
    /// Bounds handed to each new context window.
    pub context: ContextConfig,
    /// When set, a confirmed `clear` first writes a JSON backup here.
    pub backup_before_clear: Option<PathBuf>,
}

impl ManagerOptions {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            page_size: 256,
            context: ContextConfig::default(),
            backup_before_clear: None,
        }
    }

    pub fn from_config(config: &MemoryConfig, data_dir: &std::path::Path) -> Self {
        Self {
            dimension: config.dimension,
            page_size: 256,
            context: config.context_config(),
            backup_before_clear: config
                .backup
                .before_clear
                .then(|| config.backup_dir(data_dir)),
        }
    }
}

/// Parameters of a similarity retrieval.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub k: usize,
    pub min_similarity: f32,
    /// Restrict results to entries whose `metadata.type` is listed.
    pub type_filter: Option<Vec<String>>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            k: 5,
            min_similarity: 0.0,
            type_filter: None,
        }
    }
}

/// How a backend switch treats existing entries.
#[derive(Debug, Clone)]
pub struct SwitchOptions {
    /// Copy entries from the old backend into the new one before switching.
    pub copy_entries: bool,
    pub cancel: CancellationToken,
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self {
            copy_entries: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of `switch_backend`.
#[derive(Debug)]
pub enum SwitchOutcome {
    /// The new backend is active. The old one is handed back untouched.
    Switched {
        previous: Arc<BoxStorageBackend>,
        previous_descriptor: BackendDescriptor,
        migration: Option<MigrationReport>,
    },
    /// The copy was cancelled or stopped on an unreachable source; the old
    /// backend stays active and the report describes what was already
    /// written to the new one.
    Cancelled { migration: MigrationReport },
}

impl SwitchOutcome {
    pub fn migration(&self) -> Option<&MigrationReport> {
        match self {
            SwitchOutcome::Switched { migration, .. } => migration.as_ref(),
            SwitchOutcome::Cancelled { migration } => Some(migration),
        }
    }
}

/// Result of a confirmed `clear`.
#[derive(Debug, Clone)]
pub struct ClearOutcome {
    pub removed: u64,
    /// Backup written before clearing, if enabled.
    pub backup_path: Option<PathBuf>,
}

/// Backend-switch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Switching,
}

// ---------------------------------------------------------------------------
// MemoryManager
// ---------------------------------------------------------------------------

struct ActiveBackend {
    descriptor: BackendDescriptor,
    backend: Arc<BoxStorageBackend>,
    index: VectorIndex,
}

/// Resets the switch state to `Idle` on every exit path.
struct SwitchGuard<'a> {
    state: &'a Mutex<SwitchState>,
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SwitchState::Idle;
    }
}

/// Facade composing the embedder, the active storage backend and its index.
pub struct MemoryManager<F> {
    factory: F,
    embedder: BoxEmbedder,
    options: ManagerOptions,
    active: RwLock<ActiveBackend>,
    switch_state: Mutex<SwitchState>,
}

impl<F: BackendFactory> MemoryManager<F> {
    /// Open the backend for `descriptor` and index its entries.
    pub async fn open(
        factory: F,
        embedder: BoxEmbedder,
        descriptor: BackendDescriptor,
        options: ManagerOptions,
    ) -> Result<Self, MemoryError> {
        if embedder.dimension() != options.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: options.dimension,
                actual: embedder.dimension(),
            });
        }
        let backend = factory.open(&descriptor).await?;
        let index = build_index(&backend, options.dimension, options.page_size).await?;
        info!(
            backend = %descriptor.kind(),
            location = %descriptor.location(),
            indexed = index.len(),
            "memory manager ready"
        );
        Ok(Self {
            factory,
            embedder,
            options,
            active: RwLock::new(ActiveBackend {
                descriptor,
                backend: Arc::new(backend),
                index,
            }),
            switch_state: Mutex::new(SwitchState::Idle),
        })
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn embedder(&self) -> &BoxEmbedder {
        &self.embedder
    }

    pub fn switch_state(&self) -> SwitchState {
        *self.lock_state()
    }

    pub async fn descriptor(&self) -> BackendDescriptor {
        self.active.read().await.descriptor.clone()
    }

    /// Number of vectors in the active index.
    pub async fn indexed(&self) -> usize {
        self.active.read().await.index.len()
    }

    /// A fresh, empty context window using the configured bounds.
    pub fn new_context_window(&self) -> ContextWindowManager {
        ContextWindowManager::new(self.options.context.clone())
    }

    // -- store ---------------------------------------------------------------

    /// Embed and store an interaction; returns the new entry id.
    #[tracing::instrument(skip_all, fields(prompt_len = prompt.len()))]
    pub async fn store(
        &self,
        prompt: &str,
        response: &str,
        metadata: Metadata,
    ) -> Result<Uuid, MemoryError> {
        self.store_entry(MemoryEntry::new(prompt, response, Vec::new(), metadata))
            .await
    }

    /// Store an interaction with a caller-supplied embedding.
    pub async fn store_with_embedding(
        &self,
        prompt: &str,
        response: &str,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<Uuid, MemoryError> {
        self.store_entry(MemoryEntry::new(prompt, response, embedding, metadata))
            .await
    }

    /// Store a prepared entry, generating its embedding when it has none.
    pub async fn store_entry(&self, mut entry: MemoryEntry) -> Result<Uuid, MemoryError> {
        if entry.prompt.trim().is_empty() {
            return Err(MemoryError::Validation("prompt must not be empty".into()));
        }
        if entry.embedding.is_empty() {
            entry.embedding = self.embedder.embed_one(&entry.embedding_text()).await?;
        }
        entry.validate(Some(self.options.dimension))?;

        let active = self.active.read().await;
        let id = active
            .backend
            .store(&entry)
            .await
            .map_err(|e| e.with_id(entry.id))?;
        active.index.insert_entry(&entry)?;
        debug!(id = %id, backend = %active.descriptor.kind(), "stored memory entry");
        Ok(id)
    }

    // -- retrieve ------------------------------------------------------------

    /// Embed `query` and return the most similar stored entries.
    #[tracing::instrument(skip_all, fields(k = options.k, min_similarity = options.min_similarity))]
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let embedding = self.embedder.embed_one(query).await?;
        self.retrieve_by_embedding(&embedding, options).await
    }

    /// Search the index, hydrate hits from the backend and record the access.
    ///
    /// Hits whose entry has disappeared from the backend are dropped from the
    /// index and skipped.
    pub async fn retrieve_by_embedding(
        &self,
        query_embedding: &[f32],
        options: &RetrieveOptions,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let active = self.active.read().await;
        let hits = active.index.search(
            query_embedding,
            options.k,
            options.min_similarity,
            options.type_filter.as_deref(),
        )?;

        let fetched = join_all(hits.iter().map(|(id, _)| active.backend.get(id))).await;
        let now = Utc::now();
        let mut results = Vec::with_capacity(hits.len());
        for ((id, similarity), fetched) in hits.into_iter().zip(fetched) {
            let Some(mut entry) = fetched.map_err(|e| e.with_id(id))? else {
                active.index.remove(&id);
                debug!(id = %id, "dropped index entry missing from backend");
                continue;
            };
            if let Err(err) = active.backend.record_access(&id, now).await {
                warn!(id = %id, error = %err, "failed to record access");
            }
            entry.touch(now);
            results.push(ScoredEntry { entry, similarity });
        }
        Ok(results)
    }

    /// `retrieve`, abandoned with `Cancelled` if `cancel` fires first.
    pub async fn retrieve_cancellable(
        &self,
        query: &str,
        options: &RetrieveOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MemoryError::Cancelled {
                operation: "retrieve".to_string(),
            }),
            result = self.retrieve(query, options) => result,
        }
    }

    /// `retrieve`, then admit the results into a session's context window.
    pub async fn retrieve_into(
        &self,
        query: &str,
        options: &RetrieveOptions,
        window: &mut ContextWindowManager,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let results = self.retrieve(query, options).await?;
        let admitted = window.admit_scored(&results);
        debug!(
            results = results.len(),
            admitted = admitted.len(),
            window = window.len(),
            "fed retrieval into context window"
        );
        Ok(results)
    }

    // -- single-entry operations ---------------------------------------------

    pub async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        let active = self.active.read().await;
        active.backend.get(id).await
    }

    /// Like `get`, but a missing id is a `NotFound` error.
    pub async fn get_required(&self, id: &Uuid) -> Result<MemoryEntry, MemoryError> {
        self.get(id)
            .await?
            .ok_or(MemoryError::NotFound { id: *id })
    }

    /// Remove an entry from the backend and the index.
    pub async fn forget(&self, id: &Uuid) -> Result<bool, MemoryError> {
        let active = self.active.read().await;
        let removed = active.backend.remove(id).await.map_err(|e| e.with_id(*id))?;
        active.index.remove(id);
        Ok(removed)
    }

    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let active = self.active.read().await;
        active.backend.list(offset, limit).await
    }

    pub async fn stats(&self) -> Result<StorageStats, MemoryError> {
        let active = self.active.read().await;
        active.backend.stats().await
    }

    // -- destructive and bulk operations -------------------------------------

    /// Delete every entry. Requires `confirm`; writes a backup first when
    /// `backup_before_clear` is set.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, confirm: bool) -> Result<ClearOutcome, MemoryError> {
        require_confirmation(confirm)?;
        let active = self.active.write().await;

        let mut backup_path = None;
        if let Some(dir) = &self.options.backup_before_clear {
            if active.backend.stats().await?.count > 0 {
                backup_path = Some(self.write_backup_file(&active.backend, dir).await?);
            }
        }
        let removed = active.backend.clear(true).await?;
        active.index.clear();
        info!(removed, backup = ?backup_path, "cleared memory");
        Ok(ClearOutcome {
            removed,
            backup_path,
        })
    }

    /// Serialize the active backend's entries.
    #[tracing::instrument(skip(self))]
    pub async fn backup(
        &self,
        format: BackupFormat,
        include_embeddings: bool,
    ) -> Result<Vec<u8>, MemoryError> {
        let active = self.active.read().await;
        let document = create_backup(
            &active.backend,
            self.options.dimension,
            include_embeddings,
            self.options.page_size,
        )
        .await?;
        document.encode(format)
    }

    /// Load a backup blob into the active backend and rebuild the index.
    #[tracing::instrument(skip(self, blob), fields(bytes = blob.len()))]
    pub async fn restore(
        &self,
        blob: &[u8],
        format: BackupFormat,
        strategy: MergeStrategy,
    ) -> Result<RestoreReport, MemoryError> {
        let document = BackupDocument::decode(blob, format)?;
        let mut active = self.active.write().await;
        let report = restore_backup(
            &active.backend,
            document,
            strategy,
            Some(&self.embedder),
            self.options.dimension,
        )
        .await?;
        active.index =
            build_index(&active.backend, self.options.dimension, self.options.page_size).await?;
        Ok(report)
    }

    /// Copy the active backend's entries into the backend for `descriptor`
    /// without switching to it.
    #[tracing::instrument(skip_all, fields(target = %descriptor.kind()))]
    pub async fn migrate_to(
        &self,
        descriptor: &BackendDescriptor,
        cancel: CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<MigrationReport, MemoryError> {
        let _guard = self.begin_switch()?;
        let target = self.factory.open(descriptor).await?;
        let active = self.active.write().await;

        let mut plan = MigrationPlan::new(self.options.dimension)
            .with_embedder(&self.embedder)
            .with_cancel(cancel);
        plan.page_size = self.options.page_size;
        plan.progress = progress;
        migrate(&active.backend, &target, &plan).await
    }

    /// Replace the active backend with the one `descriptor` names.
    ///
    /// New operations wait on the exclusive section until the switch ends;
    /// operations already running finish against the old backend first.
    #[tracing::instrument(skip_all, fields(target = %descriptor.kind()))]
    pub async fn switch_backend(
        &self,
        descriptor: BackendDescriptor,
        options: SwitchOptions,
    ) -> Result<SwitchOutcome, MemoryError> {
        let _guard = self.begin_switch()?;
        let new_backend = self.factory.open(&descriptor).await?;
        let mut active = self.active.write().await;

        let migration = if options.copy_entries {
            let mut plan = MigrationPlan::new(self.options.dimension)
                .with_embedder(&self.embedder)
                .with_cancel(options.cancel.clone());
            plan.page_size = self.options.page_size;
            let report = migrate(&active.backend, &new_backend, &plan).await?;
            if report.cancelled || report.aborted.is_some() {
                warn!(
                    migrated = report.migrated.len(),
                    aborted = report.aborted.as_deref(),
                    "backend switch did not finish copying; previous backend stays active"
                );
                return Ok(SwitchOutcome::Cancelled { migration: report });
            }
            Some(report)
        } else {
            None
        };

        let index =
            build_index(&new_backend, self.options.dimension, self.options.page_size).await?;
        let count = new_backend.stats().await?.count;
        if index.len() as u64 != count {
            warn!(
                indexed = index.len(),
                stored = count,
                "index and backend disagree after switch"
            );
        }

        let previous = std::mem::replace(
            &mut *active,
            ActiveBackend {
                descriptor,
                backend: Arc::new(new_backend),
                index,
            },
        );
        previous.backend.invalidate_caches();
        info!(
            from = %previous.descriptor.kind(),
            to = %active.descriptor.kind(),
            entries = count,
            "switched storage backend"
        );

        Ok(SwitchOutcome::Switched {
            previous: previous.backend,
            previous_descriptor: previous.descriptor,
            migration,
        })
    }

    // -- internals -----------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, SwitchState> {
        self.switch_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_switch(&self) -> Result<SwitchGuard<'_>, MemoryError> {
        let mut state = self.lock_state();
        if *state == SwitchState::Switching {
            return Err(MemoryError::ConcurrentSwitch);
        }
        *state = SwitchState::Switching;
        Ok(SwitchGuard {
            state: &self.switch_state,
        })
    }

    async fn write_backup_file(
        &self,
        backend: &BoxStorageBackend,
        dir: &std::path::Path,
    ) -> Result<PathBuf, MemoryError> {
        let document =
            create_backup(backend, self.options.dimension, true, self.options.page_size).await?;
        let blob = document.encode(BackupFormat::Json)?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "semem-{}.{}",
            document.created_at.format("%Y%m%dT%H%M%S%.3fZ"),
            BackupFormat::Json.extension()
        ));
        tokio::fs::write(&path, blob).await?;
        info!(path = %path.display(), entries = document.entries.len(), "wrote backup before clear");
        Ok(path)
    }
}

/// Index every entry of `backend`; entries of the wrong dimension are skipped.
async fn build_index(
    backend: &BoxStorageBackend,
    dimension: usize,
    page_size: usize,
) -> Result<VectorIndex, MemoryError> {
    let index = VectorIndex::new(dimension);
    let mut skipped = 0usize;
    for entry in backend.list_all(page_size).await? {
        if let Err(err) = index.insert_entry(&entry) {
            skipped += 1;
            warn!(id = %entry.id, error = %err, "entry not indexed");
        }
    }
    if skipped > 0 {
        warn!(skipped, "some entries are not searchable");
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{KeywordEmbedder, MockFactory};
    use semem_types::backend::BackendKind;
    use semem_types::entry::TYPE_KEY;

    async fn manager(dimension: usize) -> MemoryManager<MockFactory> {
        MemoryManager::open(
            MockFactory::default(),
            BoxEmbedder::new(KeywordEmbedder::new(dimension)),
            BackendDescriptor::InMemory,
            ManagerOptions::new(dimension),
        )
        .await
        .unwrap()
    }

    fn typed(tag: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(TYPE_KEY.into(), tag.into());
        metadata
    }

    #[tokio::test]
    async fn test_open_rejects_embedder_dimension_mismatch() {
        let result = MemoryManager::open(
            MockFactory::default(),
            BoxEmbedder::new(KeywordEmbedder::new(8)),
            BackendDescriptor::InMemory,
            ManagerOptions::new(4),
        )
        .await;
        assert!(matches!(
            result,
            Err(MemoryError::DimensionMismatch {
                expected: 4,
                actual: 8
            })
        ));
    }

    #[tokio::test]
    async fn test_store_then_get_returns_equal_content() {
        let manager = manager(4).await;
        let id = manager
            .store("how do lifetimes work", "they bound borrows", typed("chat"))
            .await
            .unwrap();
        let entry = manager.get_required(&id).await.unwrap();
        assert_eq!(entry.prompt, "how do lifetimes work");
        assert_eq!(entry.response, "they bound borrows");
        assert_eq!(entry.embedding.len(), 4);
        assert_eq!(entry.type_tag(), Some("chat"));
        assert_eq!(manager.indexed().await, 1);
    }

    #[tokio::test]
    async fn test_store_rejects_bad_input_without_writing() {
        let manager = manager(4).await;
        let err = manager
            .store_with_embedding("p", "r", vec![1.0, 0.0], Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
        let err = manager.store("  ", "r", Metadata::new()).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(manager.stats().await.unwrap().count, 0);
        assert_eq!(manager.indexed().await, 0);
    }

    #[tokio::test]
    async fn test_get_missing_is_none_and_required_is_not_found() {
        let manager = manager(4).await;
        let id = Uuid::now_v7();
        assert!(manager.get(&id).await.unwrap().is_none());
        assert!(matches!(
            manager.get_required(&id).await,
            Err(MemoryError::NotFound { id: missing }) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_retrieve_ranks_and_records_access() {
        let manager = manager(4).await;
        let first = manager
            .store_with_embedding("first", "r", vec![1.0, 0.0, 0.0, 0.0], Metadata::new())
            .await
            .unwrap();
        manager
            .store_with_embedding("second", "r", vec![0.0, 1.0, 0.0, 0.0], Metadata::new())
            .await
            .unwrap();
        let third = manager
            .store_with_embedding("third", "r", vec![0.9, 0.1, 0.0, 0.0], Metadata::new())
            .await
            .unwrap();

        let options = RetrieveOptions {
            k: 2,
            min_similarity: 0.5,
            type_filter: None,
        };
        let results = manager
            .retrieve_by_embedding(&[1.0, 0.0, 0.0, 0.0], &options)
            .await
            .unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.entry.id).collect();
        assert_eq!(ids, vec![first, third]);
        assert!(results.iter().all(|r| r.similarity >= 0.5));
        assert_eq!(results[0].entry.access_count, 1);

        let stored = manager.get_required(&first).await.unwrap();
        assert_eq!(stored.access_count, 1);
        assert!(stored.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_retrieve_with_type_filter() {
        let manager = manager(4).await;
        manager
            .store_with_embedding("a", "r", vec![1.0, 0.0, 0.0, 0.0], typed("chat"))
            .await
            .unwrap();
        let concept = manager
            .store_with_embedding("b", "r", vec![0.5, 0.5, 0.0, 0.0], typed("concept"))
            .await
            .unwrap();
        let options = RetrieveOptions {
            k: 1,
            min_similarity: 0.0,
            type_filter: Some(vec!["concept".into()]),
        };
        let results = manager
            .retrieve_by_embedding(&[1.0, 0.0, 0.0, 0.0], &options)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.id, concept);
    }

    #[tokio::test]
    async fn test_retrieve_into_feeds_context_window() {
        let manager = manager(8).await;
        manager
            .store("rust ownership rules", "each value has one owner", Metadata::new())
            .await
            .unwrap();
        let mut window = manager.new_context_window();
        let results = manager
            .retrieve_into(
                "rust ownership rules each value has one owner",
                &RetrieveOptions::default(),
                &mut window,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.items()[0].id, results[0].entry.id);
    }

    #[tokio::test]
    async fn test_retrieve_cancellable_honours_cancelled_token() {
        let manager = manager(4).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager
            .retrieve_cancellable("anything", &RetrieveOptions::default(), &cancel)
            .await;
        assert!(matches!(result, Err(MemoryError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_forget_removes_from_backend_and_index() {
        let manager = manager(4).await;
        let id = manager.store("forget me", "ok", Metadata::new()).await.unwrap();
        assert!(manager.forget(&id).await.unwrap());
        assert!(!manager.forget(&id).await.unwrap());
        assert_eq!(manager.indexed().await, 0);
    }

    #[tokio::test]
    async fn test_switch_copies_entries_and_keeps_old_backend() {
        let manager = manager(4).await;
        for i in 0..5 {
            manager
                .store(&format!("entry {i}"), "r", Metadata::new())
                .await
                .unwrap();
        }
        let outcome = manager
            .switch_backend(
                BackendDescriptor::File {
                    path: PathBuf::from("/tmp/unused.json"),
                },
                SwitchOptions::default(),
            )
            .await
            .unwrap();

        let SwitchOutcome::Switched {
            previous,
            previous_descriptor,
            migration,
        } = outcome
        else {
            panic!("switch was cancelled");
        };
        assert!(migration.unwrap().is_complete());
        assert_eq!(previous_descriptor.kind(), BackendKind::InMemory);
        assert_eq!(previous.stats().await.unwrap().count, 5);

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.backend_type, BackendKind::File);
        assert_eq!(manager.indexed().await, 5);
        assert_eq!(manager.switch_state(), SwitchState::Idle);
    }

    #[tokio::test]
    async fn test_switch_without_copy_starts_empty() {
        let manager = manager(4).await;
        manager.store("x", "y", Metadata::new()).await.unwrap();
        let outcome = manager
            .switch_backend(
                BackendDescriptor::InMemory,
                SwitchOptions {
                    copy_entries: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.migration().is_none());
        assert_eq!(manager.stats().await.unwrap().count, 0);
        assert_eq!(manager.indexed().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_switch_keeps_previous_backend_active() {
        let manager = manager(4).await;
        manager.store("x", "y", Metadata::new()).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = manager
            .switch_backend(
                BackendDescriptor::File {
                    path: PathBuf::from("/tmp/unused.json"),
                },
                SwitchOptions {
                    copy_entries: true,
                    cancel,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SwitchOutcome::Cancelled { .. }));
        assert_eq!(manager.descriptor().await.kind(), BackendKind::InMemory);
        assert_eq!(manager.stats().await.unwrap().count, 1);
        assert_eq!(manager.switch_state(), SwitchState::Idle);
    }

    #[tokio::test]
    async fn test_second_switch_during_switch_is_rejected() {
        let gate = Arc::new(tokio::sync::Notify::new());
        gate.notify_one();
        let manager = MemoryManager::open(
            MockFactory {
                gate: Some(gate.clone()),
                ..Default::default()
            },
            BoxEmbedder::new(KeywordEmbedder::new(4)),
            BackendDescriptor::InMemory,
            ManagerOptions::new(4),
        )
        .await
        .unwrap();

        let first = manager.switch_backend(BackendDescriptor::InMemory, SwitchOptions::default());
        let second = async {
            while manager.switch_state() != SwitchState::Switching {
                tokio::task::yield_now().await;
            }
            let rejected = manager
                .switch_backend(BackendDescriptor::InMemory, SwitchOptions::default())
                .await;
            gate.notify_one();
            rejected
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Ok(SwitchOutcome::Switched { .. })));
        assert!(matches!(second, Err(MemoryError::ConcurrentSwitch)));
        assert_eq!(manager.switch_state(), SwitchState::Idle);
    }

    #[tokio::test]
    async fn test_store_during_switch_waits_and_lands_in_new_backend() {
        let reached = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let manager = manager(4).await;
        manager.store("before", "switch", Metadata::new()).await.unwrap();
        *manager.factory.stats_gate.lock().unwrap() = Some((reached.clone(), release.clone()));

        let switch = manager.switch_backend(
            BackendDescriptor::File {
                path: PathBuf::from("/tmp/unused.json"),
            },
            SwitchOptions::default(),
        );
        let writer = async {
            // The switch now holds the exclusive section and is parked in stats.
            reached.notified().await;
            let store = manager.store("during", "switch", Metadata::new());
            tokio::pin!(store);
            let early = tokio::time::timeout(std::time::Duration::from_millis(50), &mut store).await;
            assert!(early.is_err(), "store finished while the switch was running");
            release.notify_one();
            store.await
        };
        let (switched, stored) = tokio::join!(switch, writer);

        let SwitchOutcome::Switched { previous, .. } = switched.unwrap() else {
            panic!("switch was cancelled");
        };
        let id = stored.unwrap();
        assert!(previous.get(&id).await.unwrap().is_none());
        assert!(manager.get(&id).await.unwrap().is_some());
        assert_eq!(manager.stats().await.unwrap().backend_type, BackendKind::File);
        assert_eq!(manager.stats().await.unwrap().count, 2);
        assert_eq!(manager.indexed().await, 2);
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MemoryManager::open(
            MockFactory::default(),
            BoxEmbedder::new(KeywordEmbedder::new(4)),
            BackendDescriptor::InMemory,
            ManagerOptions {
                backup_before_clear: Some(dir.path().join("backups")),
                ..ManagerOptions::new(4)
            },
        )
        .await
        .unwrap();
        manager.store("keep a copy", "please", Metadata::new()).await.unwrap();

        assert!(matches!(
            manager.clear(false).await,
            Err(MemoryError::Validation(_))
        ));
        assert_eq!(manager.stats().await.unwrap().count, 1);

        let outcome = manager.clear(true).await.unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(manager.indexed().await, 0);
        let path = outcome.backup_path.unwrap();
        let blob = std::fs::read(&path).unwrap();
        let document = BackupDocument::decode(&blob, BackupFormat::Json).unwrap();
        assert_eq!(document.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_backup_restore_rebuilds_index() {
        let manager = manager(8).await;
        let id = manager
            .store("vector clocks", "order events", Metadata::new())
            .await
            .unwrap();
        let blob = manager.backup(BackupFormat::Rdf, false).await.unwrap();
        manager.clear(true).await.unwrap();
        assert_eq!(manager.indexed().await, 0);

        let report = manager
            .restore(&blob, BackupFormat::Rdf, MergeStrategy::Replace)
            .await
            .unwrap();
        assert_eq!(report.restored, vec![id]);
        assert_eq!(report.re_embedded, 1);
        assert_eq!(manager.indexed().await, 1);

        let results = manager
            .retrieve("vector clocks order events", &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(results[0].entry.id, id);
    }

    #[tokio::test]
    async fn test_migrate_to_leaves_active_backend_in_place() {
        let manager = manager(4).await;
        for i in 0..3 {
            manager
                .store(&format!("m{i}"), "r", Metadata::new())
                .await
                .unwrap();
        }
        let report = manager
            .migrate_to(
                &BackendDescriptor::File {
                    path: PathBuf::from("/tmp/unused.json"),
                },
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.target_count, report.source_count);
        assert_eq!(manager.descriptor().await.kind(), BackendKind::InMemory);
    }
}
