//! Memory entry types.
//!
//! A `MemoryEntry` is one stored interaction (prompt + response) with its
//! embedding vector. Content fields are append-only: after creation only the
//! access bookkeeping (`access_count`, `last_accessed_at`) changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// Free-form metadata attached to an entry (source, type, timestamps...).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the entry's type tag, used by filtered search.
pub const TYPE_KEY: &str = "type";

/// A single stored interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub prompt: String,
    pub response: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    /// Create a new entry with a fresh time-sortable id.
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            prompt: prompt.into(),
            response: response.into(),
            embedding,
            metadata,
            created_at: Utc::now(),
            access_count: 0,
            last_accessed_at: None,
        }
    }

    /// Check required fields and, when given, the embedding dimension.
    pub fn validate(&self, dimension: Option<usize>) -> Result<(), MemoryError> {
        if self.id.is_nil() {
            return Err(MemoryError::Validation("entry id must not be nil".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(MemoryError::Validation("prompt must not be empty".into()));
        }
        if self.embedding.is_empty() {
            return Err(MemoryError::Validation(format!(
                "entry {} has no embedding",
                self.id
            )));
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(MemoryError::Validation(format!(
                "entry {} has a non-finite embedding component",
                self.id
            )));
        }
        if let Some(expected) = dimension {
            if self.embedding.len() != expected {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    actual: self.embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// The entry's type tag (`metadata.type`), if it is a string.
    pub fn type_tag(&self) -> Option<&str> {
        self.metadata.get(TYPE_KEY).and_then(|v| v.as_str())
    }

    /// Text fed to the embedding provider for this interaction.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.prompt, self.response)
    }

    /// Rough token estimate (1 token ~ 4 chars).
    pub fn estimated_tokens(&self) -> usize {
        (self.prompt.len() + self.response.len()).div_ceil(4)
    }

    /// Equal in content, ignoring the access bookkeeping fields.
    pub fn content_eq(&self, other: &MemoryEntry) -> bool {
        self.id == other.id
            && self.prompt == other.prompt
            && self.response == other.response
            && self.embedding == other.embedding
            && self.metadata == other.metadata
            && self.created_at == other.created_at
    }

    /// Apply one retrieval hit to the bookkeeping fields.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Some(at);
    }
}

/// An entry paired with its similarity to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    /// Cosine similarity to the query embedding.
    pub similarity: f32,
}
