//! JSON-file storage backend.
//!
//! The whole entry set lives in memory and every mutation rewrites the file.
//! Writes go to `{path}.tmp` first, are synced, and are then renamed over the
//! real file, so a crash leaves either the old file or the new one, never a
//! torn write. A mutation whose write fails is rolled back in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use semem_core::storage::backend::{StorageBackend, require_confirmation};
use semem_core::vector::rank_entries;
use semem_types::backend::{BackendKind, StorageStats};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// On-disk layout version.
const FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct FileDocument {
    version: u32,
    entries: Vec<MemoryEntry>,
}

pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<Uuid, MemoryEntry>>,
}

impl FileBackend {
    /// Load `path`, or start empty if it does not exist yet.
    ///
    /// A file that exists but cannot be parsed is an error; it is never
    /// silently replaced.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let document: FileDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    MemoryError::Serialization(format!("{}: {e}", path.display()))
                })?;
                if document.version != FILE_VERSION {
                    return Err(MemoryError::Serialization(format!(
                        "{}: unsupported file version {}",
                        path.display(),
                        document.version
                    )));
                }
                document
                    .entries
                    .into_iter()
                    .map(|e| (e.id, e))
                    .collect::<BTreeMap<_, _>>()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No memory file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), entries = entries.len(), "opened file backend");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write the full entry set with the temp-then-rename discipline.
    async fn persist(&self, entries: &BTreeMap<Uuid, MemoryEntry>) -> Result<(), MemoryError> {
        let document = FileDocument {
            version: FILE_VERSION,
            entries: entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        trace!(path = %self.path.display(), bytes = bytes.len(), "persisted memory file");
        Ok(())
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .finish()
    }
}

impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn store(&self, entry: &MemoryEntry) -> Result<Uuid, MemoryError> {
        entry.validate(None)?;
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(entry.id, entry.clone());
        if let Err(err) = self.persist(&entries).await {
            match previous {
                Some(old) => entries.insert(entry.id, old),
                None => entries.remove(&entry.id),
            };
            return Err(err.with_id(entry.id));
        }
        Ok(entry.id)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryEntry>, MemoryError> {
        Ok(self.entries.lock().await.get(id).cloned())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        let entries = self.entries.lock().await;
        Ok(rank_entries(
            entries.values(),
            query_embedding,
            k,
            min_similarity,
            type_filter,
        ))
    }

    async fn remove(&self, id: &Uuid) -> Result<bool, MemoryError> {
        let mut entries = self.entries.lock().await;
        let Some(old) = entries.remove(id) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&entries).await {
            entries.insert(*id, old);
            return Err(err.with_id(*id));
        }
        Ok(true)
    }

    async fn clear(&self, confirm: bool) -> Result<u64, MemoryError> {
        require_confirmation(confirm)?;
        let mut entries = self.entries.lock().await;
        let previous = std::mem::take(&mut *entries);
        if let Err(err) = self.persist(&entries).await {
            *entries = previous;
            return Err(err);
        }
        Ok(previous.len() as u64)
    }

    async fn stats(&self) -> Result<StorageStats, MemoryError> {
        let count = self.entries.lock().await.len() as u64;
        let size_bytes = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Some(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Some(0),
            Err(_) => None,
        };
        Ok(StorageStats {
            count,
            size_bytes,
            backend_type: BackendKind::File,
            healthy: true,
            cache: None,
        })
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let entries = self.entries.lock().await;
        Ok(entries.values().skip(offset).take(limit).cloned().collect())
    }

    async fn record_access(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), MemoryError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            return Ok(());
        };
        let before = entry.clone();
        entry.touch(at);
        if let Err(err) = self.persist(&entries).await {
            entries.insert(*id, before);
            return Err(err.with_id(*id));
        }
        Ok(())
    }
}
