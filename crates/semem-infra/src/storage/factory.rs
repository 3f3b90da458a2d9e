//! Opens the concrete backend a descriptor names.

use semem_core::cache::CachedBackend;
use semem_core::storage::box_backend::BoxStorageBackend;
use semem_core::storage::factory::BackendFactory;
use semem_types::backend::BackendDescriptor;
use semem_types::error::MemoryError;
use tracing::debug;

use super::file::FileBackend;
use super::in_memory::InMemoryBackend;
use super::triple_store::TripleStoreBackend;

/// Factory for the four built-in storage variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    async fn open(&self, descriptor: &BackendDescriptor) -> Result<BoxStorageBackend, MemoryError> {
        debug!(
            backend = %descriptor.kind(),
            location = %descriptor.location(),
            "opening storage backend"
        );
        Ok(match descriptor {
            BackendDescriptor::InMemory => BoxStorageBackend::new(InMemoryBackend::new()),
            BackendDescriptor::File { path } => {
                BoxStorageBackend::new(FileBackend::open(path.clone()).await?)
            }
            BackendDescriptor::TripleStore { params } => {
                BoxStorageBackend::new(TripleStoreBackend::connect(params)?)
            }
            BackendDescriptor::CachedTripleStore {
                params,
                cache_capacity,
            } => BoxStorageBackend::new(CachedBackend::new(
                TripleStoreBackend::connect(params)?,
                *cache_capacity,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use semem_types::backend::{BackendKind, TripleStoreParams};
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_opens_each_variant_with_matching_kind() {
        let tmp = TempDir::new().unwrap();
        let factory = DefaultBackendFactory;
        let descriptors = [
            BackendDescriptor::InMemory,
            BackendDescriptor::File {
                path: tmp.path().join("memory.json"),
            },
            BackendDescriptor::TripleStore {
                params: TripleStoreParams::default(),
            },
            BackendDescriptor::CachedTripleStore {
                params: TripleStoreParams::default(),
                cache_capacity: 8,
            },
        ];
        for descriptor in descriptors {
            let backend = factory.open(&descriptor).await.unwrap();
            assert_eq!(backend.kind(), descriptor.kind());
        }
    }

    #[tokio::test]
    async fn test_cached_variant_reports_cached_kind() {
        let backend = DefaultBackendFactory
            .open(&BackendDescriptor::CachedTripleStore {
                params: TripleStoreParams::default(),
                cache_capacity: 4,
            })
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::CachedTripleStore);
    }
}
