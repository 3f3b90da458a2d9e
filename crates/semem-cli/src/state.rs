//! Application state wiring the memory manager for CLI commands.

use std::path::PathBuf;

use anyhow::Context;
use semem_core::embedding::box_embedder::BoxEmbedder;
use semem_core::manager::{ManagerOptions, MemoryManager};
use semem_infra::config::{load_config, resolve_data_dir};
use semem_infra::embedding::OllamaEmbedder;
use semem_infra::storage::DefaultBackendFactory;
use semem_types::backend::BackendKind;
use semem_types::config::MemoryConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Memory manager pinned to the concrete backend factory.
pub type Manager = MemoryManager<DefaultBackendFactory>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: MemoryConfig,
    pub manager: Manager,
}

impl AppState {
    /// Load config, build the embedder and open the configured backend.
    pub async fn init(data_dir: Option<PathBuf>, backend: Option<BackendKind>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let mut config = load_config(&data_dir).await;
        if let Some(kind) = backend {
            config.backend = kind;
        }

        let embedder = OllamaEmbedder::new(&config.embedding, config.dimension)?;
        let descriptor = config.descriptor(&data_dir);
        let location = descriptor.location();
        let kind = descriptor.kind();
        let manager = MemoryManager::open(
            DefaultBackendFactory,
            BoxEmbedder::new(embedder),
            descriptor,
            ManagerOptions::from_config(&config, &data_dir),
        )
        .await
        .with_context(|| format!("Failed to open {kind} backend at {location}"))?;

        debug!(backend = %kind, %location, "memory manager ready");
        Ok(Self {
            data_dir,
            config,
            manager,
        })
    }
}

/// Token cancelled on the first Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
