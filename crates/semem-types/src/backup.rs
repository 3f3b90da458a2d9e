//! Backup, restore and migration types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::BackendKind;

/// Serialization format of a backup blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFormat {
    Json,
    /// N-Triples.
    Rdf,
}

impl BackupFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BackupFormat::Json => "json",
            BackupFormat::Rdf => "nt",
        }
    }
}

impl fmt::Display for BackupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupFormat::Json => write!(f, "json"),
            BackupFormat::Rdf => write!(f, "rdf"),
        }
    }
}

impl FromStr for BackupFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(BackupFormat::Json),
            "rdf" | "nt" | "ntriples" | "n-triples" => Ok(BackupFormat::Rdf),
            other => Err(format!("invalid backup format: '{other}'")),
        }
    }
}

/// How `restore` treats entries already present in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Clear the backend first.
    Replace,
    /// Keep existing entries on id collision unless `overwrite` is set.
    Merge { overwrite: bool },
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Replace => write!(f, "replace"),
            MergeStrategy::Merge { overwrite: false } => write!(f, "merge"),
            MergeStrategy::Merge { overwrite: true } => write!(f, "merge-overwrite"),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(MergeStrategy::Replace),
            "merge" => Ok(MergeStrategy::Merge { overwrite: false }),
            "merge-overwrite" | "overwrite" => Ok(MergeStrategy::Merge { overwrite: true }),
            other => Err(format!("invalid merge strategy: '{other}'")),
        }
    }
}

/// One entry that could not be migrated or restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: Uuid,
    pub reason: String,
}

/// Outcome of a bulk transfer between two backends.
///
/// Partial success is always reported with exact ids, never collapsed into a
/// single flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source: BackendKind,
    pub target: BackendKind,
    /// Entries in the source when the migration started.
    pub source_count: u64,
    /// Entries in the target after the migration.
    pub target_count: u64,
    pub migrated: Vec<Uuid>,
    /// How many migrated entries were re-embedded for a new dimension.
    pub re_embedded: usize,
    pub failed: Vec<FailedEntry>,
    pub cancelled: bool,
    /// The target count matches what the migration wrote.
    pub verified: bool,
    /// Why the run stopped early; everything above still describes what was
    /// written before it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl MigrationReport {
    pub fn new(source: BackendKind, target: BackendKind, source_count: u64) -> Self {
        Self {
            source,
            target,
            source_count,
            target_count: 0,
            migrated: Vec::new(),
            re_embedded: 0,
            failed: Vec::new(),
            cancelled: false,
            verified: false,
            aborted: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.migrated.len()
    }

    /// Every source entry arrived and the counts were verified.
    pub fn is_complete(&self) -> bool {
        self.verified && !self.cancelled && self.aborted.is_none() && self.failed.is_empty()
    }
}

/// Outcome of restoring a backup blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: Vec<Uuid>,
    /// Existing ids kept because of the merge strategy.
    pub skipped: Vec<Uuid>,
    pub re_embedded: usize,
    pub failed: Vec<FailedEntry>,
    /// Set when the target became unreachable part way through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}
