//! Infrastructure layer for semem.
//!
//! Contains implementations of the ports defined in `semem-core`: the four
//! storage backends (in-process, JSON file, SPARQL triple store and its cached
//! variant), the Ollama embedding provider, and configuration loading.

pub mod config;
pub mod embedding;
pub mod storage;
