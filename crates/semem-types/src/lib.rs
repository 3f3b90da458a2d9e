//! Shared domain types for semem.
//!
//! This crate contains the types passed across the memory engine: stored
//! entries, context-window items, backend descriptors, configuration,
//! backup/migration reports, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod backend;
pub mod backup;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
