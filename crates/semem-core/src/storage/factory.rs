//! Backend construction from a descriptor.

use semem_types::backend::BackendDescriptor;
use semem_types::error::MemoryError;

use super::box_backend::BoxStorageBackend;

/// Opens the storage variant a `BackendDescriptor` names.
///
/// The memory manager owns one factory and uses it at construction time and
/// on every backend switch. Implementations live in semem-infra.
pub trait BackendFactory: Send + Sync {
    fn open(
        &self,
        descriptor: &BackendDescriptor,
    ) -> impl std::future::Future<Output = Result<BoxStorageBackend, MemoryError>> + Send;
}
