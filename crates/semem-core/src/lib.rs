//! Memory engine logic and storage trait definitions for semem.
//!
//! This crate defines the "ports" (storage, embedding, summarization and
//! backend-factory traits) that the infrastructure layer implements, plus the
//! engine pieces that need no I/O of their own: the vector index, the LRU
//! cache layer, the context window manager, migration, backup codecs and the
//! `MemoryManager` facade. It depends only on `semem-types`, never on
//! `semem-infra`.

pub mod backup;
pub mod cache;
pub mod context;
pub mod embedding;
pub mod manager;
pub mod migration;
pub mod retry;
pub mod storage;
pub mod vector;

#[cfg(test)]
pub(crate) mod testing;
