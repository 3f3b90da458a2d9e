//! Memory cache layer placed in front of a triple store.

pub mod cached;
pub mod lru;

pub use cached::CachedBackend;
pub use lru::LruCache;
