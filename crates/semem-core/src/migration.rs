//! Bulk transfer of entries between two backends.
//!
//! Entries are streamed page by page from the source. Each entry succeeds or
//! fails on its own: a dimension mismatch or a rejected write is recorded in
//! the report by id and the migration moves on. Cancellation stops at an
//! entry boundary and the report says exactly what was written.

use semem_types::backup::{FailedEntry, MigrationReport};
use semem_types::entry::MemoryEntry;
use semem_types::error::MemoryError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::embedding::box_embedder::BoxEmbedder;
use crate::storage::box_backend::BoxStorageBackend;

/// Progress callback: `(processed, total)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Knobs for one migration run.
pub struct MigrationPlan<'a> {
    /// Embedding length the target expects.
    pub target_dimension: usize,
    /// Used only for entries whose embedding length differs from the target's.
    pub embedder: Option<&'a BoxEmbedder>,
    pub page_size: usize,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressFn<'a>>,
}

impl<'a> MigrationPlan<'a> {
    pub fn new(target_dimension: usize) -> Self {
        Self {
            target_dimension,
            embedder: None,
            page_size: 256,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_embedder(mut self, embedder: &'a BoxEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Copy every entry of `source` into `target`.
///
/// `verified` is set when the target's final count equals its starting count
/// plus the entries this run newly created there.
#[tracing::instrument(
    name = "migrate",
    skip_all,
    fields(source = %source.kind(), target = %target.kind())
)]
pub async fn migrate(
    source: &BoxStorageBackend,
    target: &BoxStorageBackend,
    plan: &MigrationPlan<'_>,
) -> Result<MigrationReport, MemoryError> {
    let source_count = healthy_count(source, "source").await?;
    let target_before = healthy_count(target, "target").await?;
    let mut report = MigrationReport::new(source.kind(), target.kind(), source_count);
    let page_size = plan.page_size.max(1);

    let mut created: u64 = 0;
    let mut processed: u64 = 0;
    let mut offset = 0;
    'pages: loop {
        if plan.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let page = match source.list(offset, page_size).await {
            Ok(page) => page,
            Err(err) => {
                warn!(offset, error = %err, "source listing failed, stopping migration");
                report.aborted = Some(err.to_string());
                break;
            }
        };
        if page.is_empty() {
            break;
        }
        offset += page.len();
        let last_page = page.len() < page_size;

        for entry in page {
            if plan.cancel.is_cancelled() {
                report.cancelled = true;
                break 'pages;
            }
            let id = entry.id;
            match transfer(entry, target, plan, &mut report).await {
                Ok(newly_created) => {
                    report.migrated.push(id);
                    if newly_created {
                        created += 1;
                    }
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "entry not migrated");
                    report.failed.push(FailedEntry {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
            processed += 1;
            if let Some(progress) = plan.progress {
                progress(processed, source_count);
            }
        }
        if last_page {
            break;
        }
    }

    match target.stats().await {
        Ok(stats) => {
            report.target_count = stats.count;
            report.verified = stats.healthy && stats.count == target_before + created;
        }
        Err(err) => {
            warn!(error = %err, "cannot read target count after migration");
            report.aborted.get_or_insert_with(|| err.to_string());
        }
    }
    if !report.verified {
        warn!(
            target_before,
            created,
            target_after = report.target_count,
            "target count does not match migrated entries"
        );
    }
    info!(
        migrated = report.migrated.len(),
        failed = report.failed.len(),
        re_embedded = report.re_embedded,
        cancelled = report.cancelled,
        aborted = report.aborted.is_some(),
        verified = report.verified,
        "migration finished"
    );
    Ok(report)
}

/// Entry count of a backend that must be reachable before anything is copied.
///
/// Some backends answer `stats` with `healthy: false` and a zero count rather
/// than an error; a migration planned on that count would be meaningless.
async fn healthy_count(backend: &BoxStorageBackend, side: &str) -> Result<u64, MemoryError> {
    let stats = backend.stats().await?;
    if !stats.healthy {
        return Err(MemoryError::unavailable(
            "stats",
            format!("{side} backend {} reports unhealthy", backend.kind()),
        ));
    }
    Ok(stats.count)
}

/// Write one entry; returns whether it did not exist in the target before.
async fn transfer(
    mut entry: MemoryEntry,
    target: &BoxStorageBackend,
    plan: &MigrationPlan<'_>,
    report: &mut MigrationReport,
) -> Result<bool, MemoryError> {
    if entry.embedding.len() != plan.target_dimension {
        let mismatch = MemoryError::DimensionMismatch {
            expected: plan.target_dimension,
            actual: entry.embedding.len(),
        };
        let embedder = match plan.embedder {
            Some(embedder) if embedder.dimension() == plan.target_dimension => embedder,
            _ => return Err(mismatch),
        };
        entry.embedding = embedder.embed_one(&entry.embedding_text()).await?;
        report.re_embedded += 1;
    }
    let existed = target.get(&entry.id).await?.is_some();
    target.store(&entry).await?;
    Ok(!existed)
}
