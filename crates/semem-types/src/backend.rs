//! Storage backend descriptors and statistics.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The storage variant behind a memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InMemory,
    File,
    TripleStore,
    CachedTripleStore,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::InMemory
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::InMemory => write!(f, "in_memory"),
            BackendKind::File => write!(f, "file"),
            BackendKind::TripleStore => write!(f, "triple_store"),
            BackendKind::CachedTripleStore => write!(f, "cached_triple_store"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_memory" | "memory" => Ok(BackendKind::InMemory),
            "file" | "json" => Ok(BackendKind::File),
            "triple_store" | "sparql" => Ok(BackendKind::TripleStore),
            "cached_triple_store" | "cached_sparql" => Ok(BackendKind::CachedTripleStore),
            other => Err(format!("invalid backend kind: '{other}'")),
        }
    }
}

fn default_graph() -> String {
    "http://hyperdata.it/content".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

/// Connection parameters for a SPARQL triple store.
///
/// The password is never serialized and is redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct TripleStoreParams {
    pub query_endpoint: String,
    pub update_endpoint: String,
    /// Named graph holding the memory statements.
    #[serde(default = "default_graph")]
    pub graph: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per operation before surfacing `BackendUnavailable`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for TripleStoreParams {
    fn default() -> Self {
        Self {
            query_endpoint: "http://localhost:3030/semem/query".to_string(),
            update_endpoint: "http://localhost:3030/semem/update".to_string(),
            graph: default_graph(),
            username: None,
            password: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl fmt::Debug for TripleStoreParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleStoreParams")
            .field("query_endpoint", &self.query_endpoint)
            .field("update_endpoint", &self.update_endpoint)
            .field("graph", &self.graph)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Identifies the active storage variant and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendDescriptor {
    InMemory,
    File {
        path: PathBuf,
    },
    TripleStore {
        params: TripleStoreParams,
    },
    CachedTripleStore {
        params: TripleStoreParams,
        cache_capacity: usize,
    },
}

impl BackendDescriptor {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendDescriptor::InMemory => BackendKind::InMemory,
            BackendDescriptor::File { .. } => BackendKind::File,
            BackendDescriptor::TripleStore { .. } => BackendKind::TripleStore,
            BackendDescriptor::CachedTripleStore { .. } => BackendKind::CachedTripleStore,
        }
    }

    /// Short human-readable location, safe to log (no credentials).
    pub fn location(&self) -> String {
        match self {
            BackendDescriptor::InMemory => "process memory".to_string(),
            BackendDescriptor::File { path } => path.display().to_string(),
            BackendDescriptor::TripleStore { params }
            | BackendDescriptor::CachedTripleStore { params, .. } => {
                format!("{} <{}>", params.query_endpoint, params.graph)
            }
        }
    }
}

/// Hit/miss counters of the memory cache layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Snapshot of a backend's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub count: u64,
    pub size_bytes: Option<u64>,
    pub backend_type: BackendKind,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_roundtrip() {
        for kind in [
            BackendKind::InMemory,
            BackendKind::File,
            BackendKind::TripleStore,
            BackendKind::CachedTripleStore,
        ] {
            let parsed: BackendKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_backend_kind_aliases() {
        assert_eq!("sparql".parse::<BackendKind>().unwrap(), BackendKind::TripleStore);
        assert_eq!("in-memory".parse::<BackendKind>().unwrap(), BackendKind::InMemory);
        assert!("postgres".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_params_debug_redacts_password() {
        let params = TripleStoreParams {
            username: Some("admin".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{params:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_params_password_not_serialized() {
        let params = TripleStoreParams {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_descriptor_kind_and_serde_tag() {
        let descriptor = BackendDescriptor::File {
            path: PathBuf::from("/tmp/memory.json"),
        };
        assert_eq!(descriptor.kind(), BackendKind::File);
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"], "file");
    }
}
