//! Cohere embedding provider over the REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::retry::retryable_status;
use crate::types::RagError;

use super::{EmbedMode, EmbeddingProvider};

const DEFAULT_ENDPOINT: &str = "https://api.cohere.ai/v1/embed";

/// Known vector sizes per model, used to validate responses up front.
fn model_dimensions(model: &str) -> usize {
    match model {
        "embed-english-v3.0" | "embed-multilingual-v3.0" => 1024,
        "embed-english-light-v3.0" | "embed-multilingual-light-v3.0" => 384,
        "embed-english-v2.0" => 4096,
        "embed-multilingual-v2.0" => 768,
        _ => 0,
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Embedding provider backed by Cohere's `/v1/embed` endpoint.
///
/// One [`embed_batch`](EmbeddingProvider::embed_batch) call is one HTTP
/// request; retrying belongs to the caller's policy. Rate limits and 5xx
/// statuses surface as [`RagError::Transient`], everything else as
/// [`RagError::Provider`].
pub struct CohereEmbeddings {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl CohereEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RagError::Config("COHERE_API_KEY is required".into()))?;
        let client = Client::builder().use_rustls_tls().build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            model: config.model.clone(),
            dims: model_dimensions(&config.model),
            batch_size: config.batch_size.max(1),
        })
    }

    /// Point the provider at a different endpoint (tests, proxies).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for CohereEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            texts,
            input_type: mode.input_type(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    RagError::Transient {
                        endpoint: self.endpoint.clone(),
                        reason: err.to_string(),
                    }
                } else {
                    RagError::Http(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
                message: String::new(),
            });
            let reason = format!("status {status}: {}", body.message);
            return if retryable_status(status) {
                Err(RagError::Transient {
                    endpoint: self.endpoint.clone(),
                    reason,
                })
            } else {
                Err(RagError::Provider {
                    batch_start: 0,
                    reason,
                })
            };
        }

        let payload: EmbedResponse = response.json().await?;
        Ok(payload.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_have_dimensions() {
        assert_eq!(model_dimensions("embed-english-v3.0"), 1024);
        assert_eq!(model_dimensions("embed-multilingual-v2.0"), 768);
        assert_eq!(model_dimensions("some-unknown-model"), 0);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            CohereEmbeddings::new(&config),
            Err(RagError::Config(_))
        ));
    }
}
