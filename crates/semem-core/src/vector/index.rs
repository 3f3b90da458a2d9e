//! Exact cosine-similarity index keyed by entry id.
//!
//! Vectors are normalized on insert so a search is one dot product per
//! candidate. Type filtering is applied to the candidate set *before* ranking,
//! so a filtered search returns up to `k` matching entries even when matches
//! are sparse among the nearest neighbours.

use std::cmp::Ordering;

use dashmap::DashMap;
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct IndexedVector {
    unit: Vec<f32>,
    type_tag: Option<String>,
}

/// Concurrent similarity index over entry embeddings.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    vectors: DashMap<Uuid, IndexedVector>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: DashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.vectors.contains_key(id)
    }

    /// Insert or replace the vector for `id`.
    ///
    /// Re-inserting an existing id replaces its vector and type tag.
    pub fn insert(
        &self,
        id: Uuid,
        embedding: &[f32],
        type_tag: Option<&str>,
    ) -> Result<(), MemoryError> {
        self.check_dimension(embedding)?;
        self.vectors.insert(
            id,
            IndexedVector {
                unit: normalize(embedding),
                type_tag: type_tag.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Index a stored entry under its own id and type tag.
    pub fn insert_entry(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        self.insert(entry.id, &entry.embedding, entry.type_tag())
    }

    /// Remove `id`; returns whether it was present.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.vectors.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.vectors.clear();
    }

    /// Top-`k` ids by cosine similarity, descending, all `>= min_similarity`.
    ///
    /// Ties are broken by id so repeated calls return the same order.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        type_filter: Option<&[String]>,
    ) -> Result<Vec<(Uuid, f32)>, MemoryError> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = normalize(query);

        let mut hits: Vec<(Uuid, f32)> = self
            .vectors
            .iter()
            .filter(|item| type_matches(item.value().type_tag.as_deref(), type_filter))
            .map(|item| (*item.key(), dot(&query, &item.value().unit)))
            .filter(|(_, similarity)| *similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| by_similarity_desc(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(k);
        Ok(hits)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), MemoryError> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

/// Cosine similarity of two vectors; 0.0 when either has zero norm or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Rank `entries` against `query` the same way `VectorIndex::search` does.
///
/// Entries whose embedding length differs from the query are skipped.
pub fn rank_entries<'a>(
    entries: impl IntoIterator<Item = &'a MemoryEntry>,
    query: &[f32],
    k: usize,
    min_similarity: f32,
    type_filter: Option<&[String]>,
) -> Vec<ScoredEntry> {
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<ScoredEntry> = entries
        .into_iter()
        .filter(|e| e.embedding.len() == query.len())
        .filter(|e| type_matches(e.type_tag(), type_filter))
        .map(|e| ScoredEntry {
            similarity: cosine_similarity(query, &e.embedding),
            entry: e.clone(),
        })
        .filter(|s| s.similarity >= min_similarity)
        .collect();

    scored.sort_by(|a, b| {
        by_similarity_desc(a.similarity, b.similarity).then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    scored.truncate(k);
    scored
}

fn type_matches(tag: Option<&str>, filter: Option<&[String]>) -> bool {
    match filter {
        None => true,
        Some(allowed) => tag.is_some_and(|t| allowed.iter().any(|a| a == t)),
    }
}

fn by_similarity_desc(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n == 0.0 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / n).collect()
}
