//! Context window types.
//!
//! A `ContextItem` is an entry (or a summary of several entries) resident in
//! one session's working window. Relevance decays with time since admission;
//! the decay is evaluated lazily from stored timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::{MemoryEntry, Metadata};

/// Metadata key listing the entry ids a summary item was built from.
pub const SOURCE_IDS_KEY: &str = "source_ids";

/// Metadata key marking an item as a summary.
pub const SUMMARY_KEY: &str = "summary";

/// Bounds and scoring parameters of a context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget estimate for all resident items.
    pub max_tokens: usize,
    /// Candidates scoring below this similarity are not admitted.
    pub relevance_threshold: f32,
    pub max_items: usize,
    /// Half-life of the age weight, in seconds.
    pub half_life_secs: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            relevance_threshold: 0.7,
            max_items: 50,
            half_life_secs: 3600.0,
        }
    }
}

/// Partial update applied by `ContextWindowManager::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    pub max_tokens: Option<usize>,
    pub relevance_threshold: Option<f32>,
    pub max_items: Option<usize>,
}

/// Criteria for an explicit prune pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneCriteria {
    /// Remove items admitted longer ago than this.
    pub max_age: Option<Duration>,
    /// Remove items whose decayed score falls below this.
    pub min_relevance: Option<f32>,
}

/// An item resident in a context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    /// Entry id, or a fresh id for summary items.
    pub id: Uuid,
    pub prompt: String,
    pub response: String,
    pub metadata: Metadata,
    /// Similarity to the query that admitted the item.
    pub relevance_score: f32,
    pub admitted_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl ContextItem {
    /// Wrap a stored entry admitted with the given relevance.
    pub fn from_entry(entry: &MemoryEntry, relevance_score: f32, now: DateTime<Utc>) -> Self {
        Self {
            id: entry.id,
            prompt: entry.prompt.clone(),
            response: entry.response.clone(),
            metadata: entry.metadata.clone(),
            relevance_score,
            admitted_at: now,
            last_accessed_at: entry.last_accessed_at.unwrap_or(now),
        }
    }

    /// Build a summary item that stands in for `source_ids`.
    pub fn summary(
        text: String,
        source_ids: &[Uuid],
        relevance_score: f32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SUMMARY_KEY.into(), true.into());
        metadata.insert(
            SOURCE_IDS_KEY.into(),
            source_ids
                .iter()
                .map(|id| serde_json::Value::String(id.to_string()))
                .collect::<Vec<_>>()
                .into(),
        );
        Self {
            id: Uuid::now_v7(),
            prompt: "summary".to_string(),
            response: text,
            metadata,
            relevance_score,
            admitted_at: now,
            last_accessed_at: now,
        }
    }

    pub fn is_summary(&self) -> bool {
        self.metadata
            .get(SUMMARY_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Entry ids this item stands for: its own id, or a summary's provenance.
    pub fn source_ids(&self) -> Vec<Uuid> {
        if !self.is_summary() {
            return vec![self.id];
        }
        self.metadata
            .get(SOURCE_IDS_KEY)
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decay factor since admission: `0.5^(age / half_life)`.
    pub fn age_weight(&self, now: DateTime<Utc>, half_life_secs: f64) -> f32 {
        if half_life_secs <= 0.0 {
            return 1.0;
        }
        let age_secs = now
            .signed_duration_since(self.admitted_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        0.5_f64.powf(age_secs / half_life_secs) as f32
    }

    /// `relevance_score * age_weight`, the score used by pruning.
    pub fn effective_score(&self, now: DateTime<Utc>, half_life_secs: f64) -> f32 {
        self.relevance_score * self.age_weight(now, half_life_secs)
    }

    /// Rough token estimate (1 token ~ 4 chars).
    pub fn estimated_tokens(&self) -> usize {
        (self.prompt.len() + self.response.len()).div_ceil(4)
    }
}
