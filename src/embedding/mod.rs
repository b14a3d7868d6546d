//! Embedding generation behind a pluggable provider trait.
//!
//! [`EmbeddingClient`] owns batching and retries; providers only know how to
//! turn one bounded batch of texts into vectors. Results correlate with
//! their chunks by `chunk_id`, never by array position, so a failed batch
//! removes its items from the run without disturbing the rest.

pub mod cohere;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use crate::retry::{RetryPolicy, classify_rag_error};
use crate::types::{Chunk, EmbeddingVector, RagError};

pub use cohere::CohereEmbeddings;

/// Marker distinguishing document ingestion from query embedding for
/// providers that treat them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

impl EmbedMode {
    /// Wire value used by providers with distinct input types.
    pub fn input_type(&self) -> &'static str {
        match self {
            EmbedMode::Document => "search_document",
            EmbedMode::Query => "search_query",
        }
    }
}

/// A service that turns batches of texts into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Vector length this provider produces. Zero means unknown.
    fn dimensions(&self) -> usize;

    /// Largest batch one call may carry.
    fn max_batch_size(&self) -> usize {
        96
    }

    /// Embed one batch, one vector per input, in input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, RagError>;
}

/// One batch that failed after retry exhaustion or validation.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Index of the batch's first item within the input sequence.
    pub batch_start: usize,
    pub batch_len: usize,
    pub reason: String,
}

/// Result of embedding a chunk sequence: successes plus per-batch failures.
#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    /// Embeddings for every chunk whose batch succeeded, in input order.
    pub embedded: Vec<EmbeddingVector>,
    pub failures: Vec<BatchFailure>,
}

impl EmbeddingOutcome {
    pub fn failed_items(&self) -> usize {
        self.failures.iter().map(|f| f.batch_len).sum()
    }
}

/// Order-preserving, batch-splitting, retrying embedding front end.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed every chunk, reporting failed batches instead of aborting.
    ///
    /// Each batch is one retried provider call. A response length mismatch,
    /// an empty vector, or a wrong dimensionality is fatal for that batch
    /// only; remaining batches still run.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> EmbeddingOutcome {
        let mut outcome = EmbeddingOutcome::default();
        let batch_size = self.provider.max_batch_size().max(1);

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            let batch_start = batch_index * batch_size;
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            match self.embed_batch_checked(&texts, batch_start, EmbedMode::Document).await {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        outcome.embedded.push(EmbeddingVector {
                            vector,
                            chunk_id: chunk.chunk_id.clone(),
                            model_name: self.provider.model_name().to_string(),
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        batch_start,
                        batch_len = batch.len(),
                        error = %err,
                        "embedding batch failed"
                    );
                    outcome.failures.push(BatchFailure {
                        batch_start,
                        batch_len: batch.len(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        outcome
    }

    /// Embed raw texts strictly: any batch failure fails the whole call.
    pub async fn embed_texts(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        let batch_size = self.provider.max_batch_size().max(1);
        let mut all = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            let vectors = self
                .embed_batch_checked(batch, batch_index * batch_size, mode)
                .await?;
            all.extend(vectors);
        }
        Ok(all)
    }

    /// Embed one query string.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self
            .embed_texts(&[query.to_string()], EmbedMode::Query)
            .await?;
        vectors.pop().ok_or_else(|| RagError::Provider {
            batch_start: 0,
            reason: "provider returned no vector for query".into(),
        })
    }

    async fn embed_batch_checked(
        &self,
        texts: &[String],
        batch_start: usize,
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        let vectors = self
            .policy
            .run(
                || self.provider.embed_batch(texts, mode),
                classify_rag_error,
            )
            .await?;

        if vectors.len() != texts.len() {
            return Err(RagError::Provider {
                batch_start,
                reason: format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    texts.len()
                ),
            });
        }

        let expected_dims = self.provider.dimensions();
        for (offset, vector) in vectors.iter().enumerate() {
            if vector.is_empty() {
                return Err(RagError::Provider {
                    batch_start,
                    reason: format!("empty vector at item {}", batch_start + offset),
                });
            }
            if expected_dims > 0 && vector.len() != expected_dims {
                return Err(RagError::Validation {
                    id: format!("item {}", batch_start + offset),
                    reason: format!(
                        "vector has {} dimensions, model '{}' produces {}",
                        vector.len(),
                        self.provider.model_name(),
                        expected_dims
                    ),
                });
            }
        }

        Ok(vectors)
    }
}

/// Deterministic hash-based provider for tests and offline runs.
///
/// The same text always maps to the same vector; different texts map to
/// different vectors with overwhelming probability.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dims: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dims: 8 }
    }

    pub fn with_dimensions(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        (0..self.dims)
            .map(|i| {
                let bits = seed.rotate_left((i as u32 % 64) * 8) ^ ((i as u64) << 24);
                (bits as f32) / u32::MAX as f32
            })
            .collect()
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_name(&self) -> &str {
        "mock-hash"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|text| self.hash_to_vec(text)).collect())
    }
}
