//! Taking and restoring backups against a storage backend.

use semem_types::backup::{FailedEntry, MergeStrategy, RestoreReport};
use semem_types::error::MemoryError;
use tracing::{debug, info, warn};

use super::{BackupDocument, BackupEntry};
use crate::embedding::box_embedder::BoxEmbedder;
use crate::storage::box_backend::BoxStorageBackend;

/// Read every entry of `source` into a backup document.
pub async fn create_backup(
    source: &BoxStorageBackend,
    dimension: usize,
    include_embeddings: bool,
    page_size: usize,
) -> Result<BackupDocument, MemoryError> {
    let entries: Vec<BackupEntry> = source
        .list_all(page_size)
        .await?
        .iter()
        .map(|entry| BackupEntry::from_entry(entry, include_embeddings))
        .collect();
    debug!(entries = entries.len(), include_embeddings, "collected backup entries");
    BackupDocument::new(entries, source.kind(), dimension, include_embeddings)
}

/// Write a verified backup into `target`.
///
/// Entries with no embedding, or one of the wrong length, are re-embedded
/// when an embedder of the right dimension is available; otherwise they are
/// reported as failed and the rest of the restore continues. If the target
/// becomes unreachable the restore stops and the report carries the reason
/// in `aborted` next to the ids already written.
pub async fn restore_backup(
    target: &BoxStorageBackend,
    document: BackupDocument,
    strategy: MergeStrategy,
    embedder: Option<&BoxEmbedder>,
    dimension: usize,
) -> Result<RestoreReport, MemoryError> {
    document.verify()?;

    if strategy == MergeStrategy::Replace {
        let removed = target.clear(true).await?;
        info!(removed, "cleared target before replace restore");
    }
    let overwrite = matches!(strategy, MergeStrategy::Merge { overwrite: true });

    let mut report = RestoreReport::default();
    for backup_entry in document.entries {
        let id = backup_entry.id;
        if strategy != MergeStrategy::Replace && !overwrite {
            match target.get(&id).await {
                Ok(Some(_)) => {
                    report.skipped.push(id);
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    abort(&mut report, err.with_id(id));
                    break;
                }
            }
        }

        let needs_embedding = backup_entry
            .embedding
            .as_ref()
            .is_none_or(|e| e.len() != dimension);
        let embedding = if needs_embedding {
            match reembed(&backup_entry, embedder, dimension).await {
                Ok(vector) => {
                    report.re_embedded += 1;
                    vector
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "cannot restore entry without a usable embedding");
                    report.failed.push(FailedEntry {
                        id,
                        reason: err.to_string(),
                    });
                    continue;
                }
            }
        } else {
            backup_entry.embedding.clone().unwrap_or_default()
        };

        let entry = backup_entry.into_entry(embedding);
        match target.store(&entry).await {
            Ok(_) => report.restored.push(id),
            Err(err) if err.is_retryable() => {
                abort(&mut report, err.with_id(id));
                break;
            }
            Err(err) => report.failed.push(FailedEntry {
                id,
                reason: err.to_string(),
            }),
        }
    }

    info!(
        restored = report.restored.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        re_embedded = report.re_embedded,
        aborted = report.aborted.is_some(),
        "restore finished"
    );
    Ok(report)
}

fn abort(report: &mut RestoreReport, err: MemoryError) {
    warn!(
        error = %err,
        restored = report.restored.len(),
        "target unreachable, stopping restore"
    );
    report.aborted = Some(err.to_string());
}

async fn reembed(
    entry: &BackupEntry,
    embedder: Option<&BoxEmbedder>,
    dimension: usize,
) -> Result<Vec<f32>, MemoryError> {
    let embedder = embedder.ok_or_else(|| {
        MemoryError::EmbeddingProvider("no embedding provider configured for re-embedding".into())
    })?;
    if embedder.dimension() != dimension {
        return Err(MemoryError::DimensionMismatch {
            expected: dimension,
            actual: embedder.dimension(),
        });
    }
    embedder.embed_one(&entry.embedding_text()).await
}
