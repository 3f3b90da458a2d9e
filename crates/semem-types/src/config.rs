//! Configuration types for semem.
//!
//! `MemoryConfig` represents the `config.toml` in the data directory. Every
//! field has a default, so an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::{BackendDescriptor, BackendKind, TripleStoreParams};
use crate::context::ContextConfig;

/// Top-level configuration of the memory engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Embedding dimension; read once and fixed thereafter.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Capacity of the cache in front of a cached triple store.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Half-life of context-window decay, in seconds.
    #[serde(default = "default_half_life_secs")]
    pub half_life_secs: f64,

    #[serde(default)]
    pub file: FileConfig,

    #[serde(default)]
    pub triple_store: TripleStoreParams,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub backup: BackupConfig,
}

fn default_dimension() -> usize {
    768
}

fn default_max_items() -> usize {
    50
}

fn default_max_tokens() -> usize {
    8192
}

fn default_relevance_threshold() -> f32 {
    0.7
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_half_life_secs() -> f64 {
    3600.0
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            dimension: default_dimension(),
            max_items: default_max_items(),
            max_tokens: default_max_tokens(),
            relevance_threshold: default_relevance_threshold(),
            cache_capacity: default_cache_capacity(),
            half_life_secs: default_half_life_secs(),
            file: FileConfig::default(),
            triple_store: TripleStoreParams::default(),
            embedding: EmbeddingConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Context window bounds derived from this configuration.
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            max_tokens: self.max_tokens,
            relevance_threshold: self.relevance_threshold,
            max_items: self.max_items,
            half_life_secs: self.half_life_secs,
        }
    }

    /// Descriptor for `kind`, resolving relative paths against `data_dir`.
    pub fn descriptor_for(&self, kind: BackendKind, data_dir: &Path) -> BackendDescriptor {
        match kind {
            BackendKind::InMemory => BackendDescriptor::InMemory,
            BackendKind::File => BackendDescriptor::File {
                path: self.file.resolve(data_dir),
            },
            BackendKind::TripleStore => BackendDescriptor::TripleStore {
                params: self.triple_store.clone(),
            },
            BackendKind::CachedTripleStore => BackendDescriptor::CachedTripleStore {
                params: self.triple_store.clone(),
                cache_capacity: self.cache_capacity,
            },
        }
    }

    /// Descriptor for the configured backend.
    pub fn descriptor(&self, data_dir: &Path) -> BackendDescriptor {
        self.descriptor_for(self.backend, data_dir)
    }

    /// Directory backups are written to.
    pub fn backup_dir(&self, data_dir: &Path) -> PathBuf {
        match &self.backup.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => data_dir.join(dir),
            None => data_dir.join("backups"),
        }
    }
}

/// Settings for the file backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Defaults to `{data_dir}/memory.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl FileConfig {
    pub fn resolve(&self, data_dir: &Path) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => data_dir.join(path),
            None => data_dir.join("memory.json"),
        }
    }
}

/// Settings for the HTTP embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_timeout_ms() -> u64 {
    60_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// Settings for backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Defaults to `{data_dir}/backups`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Write a JSON backup before a confirmed `clear`.
    #[serde(default = "default_before_clear")]
    pub before_clear: bool,
}

fn default_before_clear() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            before_clear: default_before_clear(),
        }
    }
}
