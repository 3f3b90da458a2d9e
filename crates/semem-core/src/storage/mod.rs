//! Storage backend port.
//!
//! One trait, four independent implementations (in-process, file, triple
//! store, cached triple store) selected by a `BackendDescriptor` through a
//! `BackendFactory`.

pub mod backend;
pub mod box_backend;
pub mod factory;

pub use backend::StorageBackend;
pub use box_backend::BoxStorageBackend;
pub use factory::BackendFactory;
