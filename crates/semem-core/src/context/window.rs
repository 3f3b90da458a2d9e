//! Context window manager.
//!
//! Holds the working set of items visible to one consuming session, in
//! admission order. Every admission, prune and config update ends with a
//! bounds pass, so the window never stays over `max_items` or the token
//! budget. Decay is evaluated lazily from stored timestamps at the `now`
//! passed in; the `*_at` variants exist so callers and tests can pin time.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use semem_types::context::{ContextConfig, ContextItem, ContextUpdate, PruneCriteria};
use semem_types::entry::{MemoryEntry, ScoredEntry};
use semem_types::error::MemoryError;
use tracing::debug;
use uuid::Uuid;

use super::summarizer::Summarizer;
use crate::vector::cosine_similarity;

/// Bounded, per-session working set of context items.
///
/// Not shared: each session owns its manager and mutates it through `&mut`.
#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    config: ContextConfig,
    items: Vec<ContextItem>,
}

impl ContextWindowManager {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Resident items in admission order.
    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Estimated tokens of all resident items.
    pub fn token_count(&self) -> usize {
        self.items.iter().map(ContextItem::estimated_tokens).sum()
    }

    /// Whether `entry_id` is resident, directly or through a summary.
    pub fn represents(&self, entry_id: &Uuid) -> bool {
        self.items
            .iter()
            .any(|item| item.source_ids().contains(entry_id))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply new bounds and evict immediately if they are now violated.
    ///
    /// Returns the ids of evicted items.
    pub fn update(&mut self, update: ContextUpdate) -> Vec<Uuid> {
        self.update_at(update, Utc::now())
    }

    pub fn update_at(&mut self, update: ContextUpdate, now: DateTime<Utc>) -> Vec<Uuid> {
        if let Some(max_tokens) = update.max_tokens {
            self.config.max_tokens = max_tokens;
        }
        if let Some(threshold) = update.relevance_threshold {
            self.config.relevance_threshold = threshold;
        }
        if let Some(max_items) = update.max_items {
            self.config.max_items = max_items;
        }
        self.enforce_bounds(now)
    }

    /// Score candidates against the query and admit those above the
    /// relevance threshold.
    ///
    /// Returns the ids newly admitted and still resident after the bounds pass.
    pub fn admit(&mut self, candidates: &[MemoryEntry], query_embedding: &[f32]) -> Vec<Uuid> {
        self.admit_at(candidates, query_embedding, Utc::now())
    }

    pub fn admit_at(
        &mut self,
        candidates: &[MemoryEntry],
        query_embedding: &[f32],
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        let scored: Vec<ScoredEntry> = candidates
            .iter()
            .map(|entry| ScoredEntry {
                similarity: cosine_similarity(&entry.embedding, query_embedding),
                entry: entry.clone(),
            })
            .collect();
        self.admit_scored_at(&scored, now)
    }

    /// Admit candidates whose similarity was already computed by a search.
    pub fn admit_scored(&mut self, scored: &[ScoredEntry]) -> Vec<Uuid> {
        self.admit_scored_at(scored, Utc::now())
    }

    pub fn admit_scored_at(&mut self, scored: &[ScoredEntry], now: DateTime<Utc>) -> Vec<Uuid> {
        let mut admitted = Vec::new();
        for candidate in scored {
            if candidate.similarity < self.config.relevance_threshold {
                debug!(
                    id = %candidate.entry.id,
                    similarity = candidate.similarity,
                    "candidate below relevance threshold"
                );
                continue;
            }
            if let Some(resident) = self.items.iter_mut().find(|i| i.id == candidate.entry.id) {
                resident.relevance_score = resident.relevance_score.max(candidate.similarity);
                resident.last_accessed_at = now;
                continue;
            }
            if self.represents(&candidate.entry.id) {
                continue;
            }
            self.items
                .push(ContextItem::from_entry(&candidate.entry, candidate.similarity, now));
            admitted.push(candidate.entry.id);
        }

        let evicted: HashSet<Uuid> = self.enforce_bounds(now).into_iter().collect();
        admitted.retain(|id| !evicted.contains(id));
        admitted
    }

    /// Remove items by age or decayed relevance, then enforce bounds.
    ///
    /// Running the same criteria again at the same `now` removes nothing.
    pub fn prune(&mut self, criteria: &PruneCriteria) -> Vec<Uuid> {
        self.prune_at(criteria, Utc::now())
    }

    pub fn prune_at(&mut self, criteria: &PruneCriteria, now: DateTime<Utc>) -> Vec<Uuid> {
        let half_life = self.config.half_life_secs;
        let max_age = criteria
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok());

        let mut removed = Vec::new();
        self.items.retain(|item| {
            let too_old = max_age.is_some_and(|max| now.signed_duration_since(item.admitted_at) > max);
            let too_weak = criteria
                .min_relevance
                .is_some_and(|min| item.effective_score(now, half_life) < min);
            if too_old || too_weak {
                removed.push(item.id);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            debug!(count = removed.len(), "pruned context items by criteria");
        }

        removed.extend(self.enforce_bounds(now));
        removed
    }

    /// Replace the least-recently-relevant half of the window with a single
    /// summary item carrying the union of their source ids.
    ///
    /// Returns the summary's id, or `None` when fewer than two items are resident.
    pub async fn summarize<S: Summarizer>(
        &mut self,
        summarizer: &S,
    ) -> Result<Option<Uuid>, MemoryError> {
        self.summarize_at(summarizer, Utc::now()).await
    }

    #[tracing::instrument(name = "summarize_context", skip_all, fields(items = self.items.len()))]
    pub async fn summarize_at<S: Summarizer>(
        &mut self,
        summarizer: &S,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, MemoryError> {
        if self.items.len() < 2 {
            return Ok(None);
        }
        let count = (self.items.len() / 2).max(2);
        let mut ranked: Vec<usize> = (0..self.items.len()).collect();
        ranked.sort_by(|&a, &b| self.eviction_order(a, b, now));
        let chosen: HashSet<usize> = ranked.into_iter().take(count).collect();

        // Keep admission order for the text.
        let selected: Vec<ContextItem> = self
            .items
            .iter()
            .enumerate()
            .filter(|(i, _)| chosen.contains(i))
            .map(|(_, item)| item.clone())
            .collect();

        let text = summarizer.summarize(&selected).await?;

        let mut source_ids = Vec::new();
        for item in &selected {
            for id in item.source_ids() {
                if !source_ids.contains(&id) {
                    source_ids.push(id);
                }
            }
        }
        let half_life = self.config.half_life_secs;
        let score = selected
            .iter()
            .map(|item| item.effective_score(now, half_life))
            .sum::<f32>()
            / selected.len() as f32;

        let summary = ContextItem::summary(text, &source_ids, score, now);
        let summary_id = summary.id;

        let mut index = 0;
        self.items.retain(|_| {
            let keep = !chosen.contains(&index);
            index += 1;
            keep
        });
        self.items.push(summary);
        debug!(
            summarized = selected.len(),
            sources = source_ids.len(),
            "replaced context items with summary"
        );

        self.enforce_bounds(now);
        Ok(Some(summary_id))
    }

    /// Plain-text rendering of the window for a downstream prompt.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                if item.is_summary() {
                    format!("Summary of earlier context:\n{}", item.response)
                } else {
                    format!("User: {}\nAssistant: {}", item.prompt, item.response)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Evict lowest effective score first (oldest `last_accessed_at` on ties)
    /// until both `max_items` and `max_tokens` hold.
    fn enforce_bounds(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut evicted = Vec::new();
        let mut tokens = self.token_count();
        while !self.items.is_empty()
            && (self.items.len() > self.config.max_items || tokens > self.config.max_tokens)
        {
            let victim = (0..self.items.len())
                .min_by(|&a, &b| self.eviction_order(a, b, now))
                .unwrap_or(0);
            let item = self.items.remove(victim);
            tokens -= item.estimated_tokens();
            evicted.push(item.id);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted context items over bounds");
        }
        evicted
    }

    fn eviction_order(&self, a: usize, b: usize, now: DateTime<Utc>) -> std::cmp::Ordering {
        let half_life = self.config.half_life_secs;
        let (x, y) = (&self.items[a], &self.items[b]);
        x.effective_score(now, half_life)
            .total_cmp(&y.effective_score(now, half_life))
            .then_with(|| x.last_accessed_at.cmp(&y.last_accessed_at))
            .then_with(|| a.cmp(&b))
    }
}
