//! Ollama embedding provider.
//!
//! Uses the batch endpoint `POST /api/embed { model, input: [..] }` and falls
//! back to the legacy single-text `POST /api/embeddings { model, prompt }` when
//! the server predates it (404 on the batch route).

use std::time::Duration;

use semem_core::embedding::embedder::Embedder;
use semem_types::config::EmbeddingConfig;
use semem_types::error::MemoryError;
use serde_json::{Value, json};
use tracing::info;

/// Embedder backed by a local or remote Ollama server.
#[derive(Debug)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    /// `dimension` is the configured index dimension; vectors of any other
    /// length are rejected.
    pub fn new(config: &EmbeddingConfig, dimension: usize) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| MemoryError::EmbeddingProvider(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension,
        })
    }

    /// Batch endpoint. `Ok(None)` means the server does not have it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Option<Vec<Vec<f32>>>, MemoryError> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|e| unreachable_error(&self.base_url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            if body.contains("model") {
                return Err(MemoryError::EmbeddingProvider(format!(
                    "model '{}' not found: {body}",
                    self.model
                )));
            }
            info!("Ollama /api/embed unavailable, using legacy /api/embeddings");
            return Ok(None);
        }
        let body = read_json(response).await?;
        parse_batch_response(&body).map(Some)
    }

    async fn embed_legacy(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(|e| unreachable_error(&self.base_url, e))?;
        let body = read_json(response).await?;
        parse_single_response(&body)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), MemoryError> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl Embedder for OllamaEmbedder {
    #[tracing::instrument(name = "ollama_embed", skip_all, fields(model = %self.model, texts = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = match self.embed_batch(texts).await? {
            Some(vectors) => vectors,
            None => {
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    vectors.push(self.embed_legacy(text).await?);
                }
                vectors
            }
        };
        if vectors.len() != texts.len() {
            return Err(MemoryError::EmbeddingProvider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn unreachable_error(base_url: &str, err: reqwest::Error) -> MemoryError {
    MemoryError::EmbeddingProvider(format!(
        "Ollama not reachable at {base_url} (is it running?): {err}"
    ))
}

async fn read_json(response: reqwest::Response) -> Result<Value, MemoryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MemoryError::EmbeddingProvider(format!(
            "HTTP {status}: {body}"
        )));
    }
    response
        .json()
        .await
        .map_err(|e| MemoryError::EmbeddingProvider(format!("invalid response body: {e}")))
}

fn to_vector(values: &[Value]) -> Result<Vec<f32>, MemoryError> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                MemoryError::EmbeddingProvider(format!("non-numeric embedding component: {v}"))
            })
        })
        .collect()
}

/// `{ "embeddings": [[..], ..] }`; some versions answer `{ "embedding": [..] }`.
fn parse_batch_response(body: &Value) -> Result<Vec<Vec<f32>>, MemoryError> {
    if let Some(embeddings) = body.get("embeddings").and_then(|e| e.as_array()) {
        return embeddings
            .iter()
            .map(|e| {
                e.as_array().map(|v| to_vector(v)).unwrap_or_else(|| {
                    Err(MemoryError::EmbeddingProvider(
                        "embedding is not an array".into(),
                    ))
                })
            })
            .collect();
    }
    parse_single_response(body).map(|v| vec![v])
}

/// `{ "embedding": [..] }`.
fn parse_single_response(body: &Value) -> Result<Vec<f32>, MemoryError> {
    let Some(values) = body.get("embedding").and_then(|e| e.as_array()) else {
        return Err(MemoryError::EmbeddingProvider(format!(
            "response has no embedding field: {body}"
        )));
    };
    let vector = to_vector(values)?;
    if vector.is_empty() {
        return Err(MemoryError::EmbeddingProvider("empty embedding".into()));
    }
    Ok(vector)
}
