//! Embedder trait for text-to-vector conversion.

use semem_types::error::MemoryError;

/// Trait for converting text into embedding vectors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in semem-infra.
pub trait Embedder: Send + Sync {
    /// Embed one or more texts into vectors.
    ///
    /// Returns one vector per input text, in input order.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, MemoryError>> + Send;

    /// The model name used for embeddings (e.g., "nomic-embed-text").
    fn model_name(&self) -> &str;

    /// The declared dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}
