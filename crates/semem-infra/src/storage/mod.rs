//! Storage backend implementations.

pub mod factory;
pub mod file;
pub mod in_memory;
pub mod sparql;
pub mod triple_store;

pub use factory::DefaultBackendFactory;
pub use file::FileBackend;
pub use in_memory::InMemoryBackend;
pub use triple_store::{HttpSparqlTransport, SparqlTransport, TripleStoreBackend};
