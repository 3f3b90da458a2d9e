//! Self-describing backup documents.
//!
//! A backup carries a format tag, a version, the embedding dimension it was
//! taken at and a SHA-256 checksum over the canonical JSON of its entries.
//! `decode` refuses anything it cannot restore safely.

pub mod json;
pub mod rdf;
pub mod restore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use semem_types::backend::BackendKind;
use semem_types::backup::BackupFormat;
use semem_types::entry::{MemoryEntry, Metadata};
use semem_types::error::MemoryError;

pub use restore::{create_backup, restore_backup};

/// Format tag written into every backup.
pub const BACKUP_FORMAT: &str = "semem-backup";

/// Current backup layout version.
pub const BACKUP_VERSION: u32 = 1;

/// One entry as written into a backup; the embedding is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: Uuid,
    pub prompt: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl BackupEntry {
    pub fn from_entry(entry: &MemoryEntry, include_embedding: bool) -> Self {
        Self {
            id: entry.id,
            prompt: entry.prompt.clone(),
            response: entry.response.clone(),
            embedding: include_embedding.then(|| entry.embedding.clone()),
            metadata: entry.metadata.clone(),
            created_at: entry.created_at,
            access_count: entry.access_count,
            last_accessed_at: entry.last_accessed_at,
        }
    }

    /// Rebuild the stored entry around `embedding`.
    pub fn into_entry(self, embedding: Vec<f32>) -> MemoryEntry {
        MemoryEntry {
            id: self.id,
            prompt: self.prompt,
            response: self.response,
            embedding,
            metadata: self.metadata,
            created_at: self.created_at,
            access_count: self.access_count,
            last_accessed_at: self.last_accessed_at,
        }
    }

    /// Text to re-embed when the backup carries no usable vector.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.prompt, self.response)
    }
}

/// A complete backup: header fields plus entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub format: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub source: BackendKind,
    pub dimension: usize,
    pub include_embeddings: bool,
    pub checksum: String,
    pub entries: Vec<BackupEntry>,
}

impl BackupDocument {
    pub fn new(
        entries: Vec<BackupEntry>,
        source: BackendKind,
        dimension: usize,
        include_embeddings: bool,
    ) -> Result<Self, MemoryError> {
        let checksum = checksum_of(&entries)?;
        Ok(Self {
            format: BACKUP_FORMAT.to_string(),
            version: BACKUP_VERSION,
            created_at: Utc::now(),
            source,
            dimension,
            include_embeddings,
            checksum,
            entries,
        })
    }

    /// Check the format tag, version and checksum.
    pub fn verify(&self) -> Result<(), MemoryError> {
        if self.format != BACKUP_FORMAT {
            return Err(MemoryError::Validation(format!(
                "unsupported backup format '{}'",
                self.format
            )));
        }
        if self.version != BACKUP_VERSION {
            return Err(MemoryError::Validation(format!(
                "unsupported backup version {} (expected {BACKUP_VERSION})",
                self.version
            )));
        }
        let actual = checksum_of(&self.entries)?;
        if actual != self.checksum {
            return Err(MemoryError::Validation(format!(
                "backup checksum mismatch: header {}, content {actual}",
                self.checksum
            )));
        }
        Ok(())
    }

    pub fn encode(&self, format: BackupFormat) -> Result<Vec<u8>, MemoryError> {
        match format {
            BackupFormat::Json => json::encode(self),
            BackupFormat::Rdf => Ok(rdf::encode(self)?.into_bytes()),
        }
    }

    /// Parse and verify a backup blob.
    pub fn decode(bytes: &[u8], format: BackupFormat) -> Result<Self, MemoryError> {
        let document = match format {
            BackupFormat::Json => json::decode(bytes)?,
            BackupFormat::Rdf => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    MemoryError::Serialization(format!("backup is not valid UTF-8: {e}"))
                })?;
                rdf::decode(text)?
            }
        };
        document.verify()?;
        Ok(document)
    }
}

/// Hex SHA-256 of the canonical JSON encoding of `entries`.
pub fn checksum_of(entries: &[BackupEntry]) -> Result<String, MemoryError> {
    let canonical = serde_json::to_vec(entries)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_entries() -> Vec<MemoryEntry> {
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), "interaction".into());
        metadata.insert("tags".into(), json!(["a", "b"]));
        let mut first = MemoryEntry::new(
            "What is \"RDF\"?",
            "A graph model.\nLine two\twith tab \\ and ünïcode",
            vec![0.1, -0.25, 3.5e-3, 1.0],
            metadata,
        );
        first.touch(Utc::now());
        let second = MemoryEntry::new("second", "answer", vec![0.0, 1.0, 0.0, 0.0], Metadata::new());
        vec![first, second]
    }

    fn document(include_embeddings: bool) -> BackupDocument {
        let entries = sample_entries()
            .iter()
            .map(|e| BackupEntry::from_entry(e, include_embeddings))
            .collect();
        BackupDocument::new(entries, BackendKind::InMemory, 4, include_embeddings).unwrap()
    }

    #[test]
    fn test_new_document_verifies() {
        let doc = document(true);
        assert_eq!(doc.format, BACKUP_FORMAT);
        assert_eq!(doc.version, BACKUP_VERSION);
        assert_eq!(doc.checksum.len(), 64);
        doc.verify().unwrap();
    }

    #[test]
    fn test_tampered_entries_fail_checksum() {
        let mut doc = document(true);
        doc.entries[0].response = "tampered".into();
        let err = doc.verify().unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_unknown_format_and_version_rejected() {
        let mut doc = document(false);
        doc.format = "other-tool".into();
        assert!(doc.verify().is_err());

        let mut doc = document(false);
        doc.version = 99;
        assert!(doc.verify().unwrap_err().to_string().contains("version 99"));
    }

    #[test]
    fn test_both_encodings_restore_the_same_document() {
        for include in [true, false] {
            let doc = document(include);
            for format in [BackupFormat::Json, BackupFormat::Rdf] {
                let blob = doc.encode(format).unwrap();
                let decoded = BackupDocument::decode(&blob, format).unwrap();
                assert_eq!(decoded.entries, doc.entries, "{format} include={include}");
                assert_eq!(decoded.dimension, 4);
                assert_eq!(decoded.include_embeddings, include);
            }
        }
    }

    #[test]
    fn test_entries_without_embeddings_omit_field() {
        let doc = document(false);
        let blob = doc.encode(BackupFormat::Json).unwrap();
        let text = String::from_utf8(blob).unwrap();
        assert!(!text.contains("\"embedding\""));
    }
}
