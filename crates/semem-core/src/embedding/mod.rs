//! Embedding provider port.
//!
//! Providers map text to fixed-length vectors. The declared dimension is read
//! once when the engine is configured and treated as fixed afterwards.

pub mod box_embedder;
pub mod embedder;
