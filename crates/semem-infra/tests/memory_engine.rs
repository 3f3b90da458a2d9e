//! End-to-end behaviour of the memory manager over the real backends.

use std::path::Path;

use chrono::{Duration, Utc};
use semem_core::embedding::box_embedder::BoxEmbedder;
use semem_core::embedding::embedder::Embedder;
use semem_core::manager::{
    ManagerOptions, MemoryManager, RetrieveOptions, SwitchOptions, SwitchOutcome,
};
use semem_core::migration::{MigrationPlan, migrate};
use semem_core::storage::backend::StorageBackend;
use semem_core::storage::box_backend::BoxStorageBackend;
use semem_infra::storage::{DefaultBackendFactory, FileBackend, InMemoryBackend};
use semem_types::backend::{BackendDescriptor, BackendKind};
use semem_types::backup::{BackupFormat, MergeStrategy};
use semem_types::context::{ContextConfig, PruneCriteria};
use semem_types::entry::{MemoryEntry, Metadata};
use semem_types::error::MemoryError;
use tempfile::TempDir;

const DIM: usize = 16;

/// Deterministic bag-of-words embedder: each word bumps one bucket.
struct WordBuckets;

impl Embedder for WordBuckets {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0; DIM];
                for word in text.split_whitespace() {
                    let bucket = word.bytes().map(usize::from).sum::<usize>() % DIM;
                    v[bucket] += 1.0;
                }
                v
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "word-buckets"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

async fn manager_on(
    descriptor: BackendDescriptor,
    options: ManagerOptions,
) -> MemoryManager<DefaultBackendFactory> {
    MemoryManager::open(
        DefaultBackendFactory,
        BoxEmbedder::new(WordBuckets),
        descriptor,
        options,
    )
    .await
    .unwrap()
}

fn file_descriptor(dir: &Path) -> BackendDescriptor {
    BackendDescriptor::File {
        path: dir.join("memory.json"),
    }
}

#[tokio::test]
async fn store_then_get_returns_equal_entry_on_every_local_backend() {
    let tmp = TempDir::new().unwrap();
    for descriptor in [BackendDescriptor::InMemory, file_descriptor(tmp.path())] {
        let manager = manager_on(descriptor, ManagerOptions::new(DIM)).await;
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), "chat".into());
        metadata.insert("source".into(), "integration".into());
        let id = manager
            .store("what is borrowing", "a temporary reference", metadata.clone())
            .await
            .unwrap();

        let entry = manager.get_required(&id).await.unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.prompt, "what is borrowing");
        assert_eq!(entry.response, "a temporary reference");
        assert_eq!(entry.metadata, metadata);
        assert_eq!(entry.embedding.len(), DIM);
    }
}

#[tokio::test]
async fn file_backend_entries_are_searchable_after_restart() {
    let tmp = TempDir::new().unwrap();
    let id = {
        let manager = manager_on(file_descriptor(tmp.path()), ManagerOptions::new(DIM)).await;
        manager
            .store("tokio runtime", "drives futures", Metadata::new())
            .await
            .unwrap()
    };

    let reopened = manager_on(file_descriptor(tmp.path()), ManagerOptions::new(DIM)).await;
    assert_eq!(reopened.indexed().await, 1);
    let results = reopened
        .retrieve("tokio runtime drives futures", &RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].entry.id, id);
    assert!(results[0].similarity > 0.99);
}

#[tokio::test]
async fn retrieval_scenario_with_explicit_embeddings() {
    let manager = MemoryManager::open(
        DefaultBackendFactory,
        BoxEmbedder::new(FixedDim(4)),
        BackendDescriptor::InMemory,
        ManagerOptions::new(4),
    )
    .await
    .unwrap();
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

    let results = manager
        .retrieve_by_embedding(
            &[1.0, 0.0, 0.0, 0.0],
            &RetrieveOptions {
                k: 2,
                min_similarity: 0.5,
                type_filter: None,
            },
        )
        .await
        .unwrap();
    assert!(results.len() <= 2);
    assert_eq!(results[0].entry.id, first);
    assert_eq!(results[1].entry.id, third);
    assert!(results[0].similarity >= results[1].similarity);
    assert!(results.iter().all(|r| r.similarity >= 0.5));
}

/// Embedder stand-in for tests that always supply their own vectors.
struct FixedDim(usize);

impl Embedder for FixedDim {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts.iter().map(|_| vec![1.0; self.0]).collect())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        self.0
    }
}

#[tokio::test]
async fn switch_from_in_memory_to_file_keeps_old_entries() {
    let tmp = TempDir::new().unwrap();
    let manager = manager_on(BackendDescriptor::InMemory, ManagerOptions::new(DIM)).await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            manager
                .store(&format!("question {i}"), &format!("answer {i}"), Metadata::new())
                .await
                .unwrap(),
        );
    }

    let outcome = manager
        .switch_backend(file_descriptor(tmp.path()), SwitchOptions::default())
        .await
        .unwrap();
    let SwitchOutcome::Switched {
        previous,
        migration,
        ..
    } = outcome
    else {
        panic!("switch did not complete");
    };

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.backend_type, BackendKind::File);
    assert_eq!(stats.count, 5);
    assert_eq!(manager.indexed().await, 5);
    assert!(migration.unwrap().is_complete());

    assert_eq!(previous.kind(), BackendKind::InMemory);
    assert_eq!(previous.stats().await.unwrap().count, 5);
    for id in &ids {
        assert!(previous.get(id).await.unwrap().is_some());
    }

    let on_disk = FileBackend::open(tmp.path().join("memory.json")).await.unwrap();
    assert_eq!(on_disk.stats().await.unwrap().count, 5);
}

#[tokio::test]
async fn migrate_makes_counts_agree() {
    let tmp = TempDir::new().unwrap();
    let source = BoxStorageBackend::new(InMemoryBackend::new());
    for i in 0..7 {
        let entry = MemoryEntry::new(
            format!("p{i}"),
            "r",
            vec![i as f32 + 1.0; DIM],
            Metadata::new(),
        );
        source.store(&entry).await.unwrap();
    }
    let target = BoxStorageBackend::new(
        FileBackend::open(tmp.path().join("target.json"))
            .await
            .unwrap(),
    );

    let mut plan = MigrationPlan::new(DIM);
    plan.page_size = 3;
    let report = migrate(&source, &target, &plan).await.unwrap();

    assert_eq!(report.succeeded(), 7);
    assert!(report.failed.is_empty());
    assert!(report.verified);
    assert_eq!(
        target.stats().await.unwrap().count,
        source.stats().await.unwrap().count
    );
}

#[tokio::test]
async fn migrate_reports_dimension_mismatches_per_entry() {
    let source = BoxStorageBackend::new(InMemoryBackend::new());
    let good = MemoryEntry::new("good", "r", vec![1.0; DIM], Metadata::new());
    let bad = MemoryEntry::new("bad", "r", vec![1.0; DIM / 2], Metadata::new());
    source.store(&good).await.unwrap();
    source.store(&bad).await.unwrap();
    let target = BoxStorageBackend::new(InMemoryBackend::new());

    let report = migrate(&source, &target, &MigrationPlan::new(DIM))
        .await
        .unwrap();
    assert_eq!(report.migrated, vec![good.id]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, bad.id);
    assert!(!report.is_complete());
}

#[tokio::test]
async fn context_window_stays_bounded_and_prune_is_idempotent() {
    let options = ManagerOptions {
        context: ContextConfig {
            max_items: 3,
            relevance_threshold: 0.0,
            ..ContextConfig::default()
        },
        ..ManagerOptions::new(DIM)
    };
    let manager = manager_on(BackendDescriptor::InMemory, options).await;
    for i in 0..8 {
        manager
            .store(
                &format!("rust topic number {i}"),
                "details about rust",
                Metadata::new(),
            )
            .await
            .unwrap();
    }

    let mut window = manager.new_context_window();
    let retrieve = RetrieveOptions {
        k: 8,
        ..RetrieveOptions::default()
    };
    manager
        .retrieve_into("rust topic", &retrieve, &mut window)
        .await
        .unwrap();
    assert!(window.len() <= 3);

    let now = Utc::now() + Duration::minutes(90);
    let criteria = PruneCriteria {
        max_age: None,
        min_relevance: Some(0.3),
    };
    window.prune_at(&criteria, now);
    assert!(window.len() <= 3);
    assert!(window.prune_at(&criteria, now).is_empty());
}

#[tokio::test]
async fn backup_from_memory_restores_into_file_backend() {
    let tmp = TempDir::new().unwrap();
    let source = manager_on(BackendDescriptor::InMemory, ManagerOptions::new(DIM)).await;
    let id = source
        .store("sparql graphs", "named graph isolation", Metadata::new())
        .await
        .unwrap();

    for format in [BackupFormat::Json, BackupFormat::Rdf] {
        let blob = source.backup(format, false).await.unwrap();
        let dir = tmp.path().join(format.extension());
        let target = manager_on(file_descriptor(&dir), ManagerOptions::new(DIM)).await;
        let report = target
            .restore(&blob, format, MergeStrategy::Replace)
            .await
            .unwrap();
        assert_eq!(report.restored, vec![id]);
        assert_eq!(report.re_embedded, 1);

        let results = target
            .retrieve("sparql graphs named graph isolation", &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(results[0].entry.id, id);
    }
}

#[tokio::test]
async fn clear_writes_backup_before_deleting() {
    let tmp = TempDir::new().unwrap();
    let options = ManagerOptions {
        backup_before_clear: Some(tmp.path().join("backups")),
        ..ManagerOptions::new(DIM)
    };
    let manager = manager_on(file_descriptor(tmp.path()), options).await;
    manager.store("keep", "me", Metadata::new()).await.unwrap();

    assert!(manager.clear(false).await.is_err());
    let outcome = manager.clear(true).await.unwrap();
    assert_eq!(outcome.removed, 1);
    assert!(outcome.backup_path.unwrap().exists());
    assert_eq!(manager.stats().await.unwrap().count, 0);
}
