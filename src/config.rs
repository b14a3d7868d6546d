//! Environment-driven configuration for the ingestion and retrieval stack.
//!
//! Outer layers (HTTP routes, CLIs) construct a [`RaglineConfig`] once, via
//! [`RaglineConfig::from_env`] or plain struct literals in tests, and inject
//! it into the components they build. No component reads the environment on
//! its own.

use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::RagError;

/// Crawling stage settings.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub request_timeout: Duration,
    /// Politeness delay between sequential fetches made by one worker.
    pub request_delay: Duration,
    pub max_retries: u32,
    pub max_concurrent_fetches: usize,
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            request_delay: Duration::from_secs(1),
            max_retries: 3,
            max_concurrent_fetches: 5,
            user_agent: "ragline-ingestor/0.1".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Retry policy derived from this configuration. `max_retries` counts
    /// retries after the first attempt, matching the crawler contract.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries + 1,
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
    }
}

/// Chunker settings, in whitespace-word tokens.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 350,
            overlap_tokens: 50,
            min_tokens: 10,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "embed-english-v3.0".to_string(),
            batch_size: 96,
            max_retries: 3,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries + 1,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
    }
}

/// Vector store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub collection: String,
    pub upsert_batch_size: usize,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            collection: "book_embeddings".to_string(),
            upsert_batch_size: 64,
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries + 1,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
    }
}

/// Retrieval and answer-validation settings.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    pub max_context_chars: usize,
    /// Alignment threshold when the context is user-selected text.
    pub selected_text_threshold: f32,
    /// Alignment threshold when the context came from corpus search.
    pub book_wide_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: None,
            max_context_chars: 12_000,
            selected_text_threshold: 0.8,
            book_wide_threshold: 0.6,
        }
    }
}

/// Top-level configuration assembled from the environment.
#[derive(Debug, Clone, Default)]
pub struct RaglineConfig {
    pub crawl: CrawlConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub retrieval: RetrievalConfig,
    /// Wall-clock budget for a whole pipeline run; `None` means unbounded.
    pub pipeline_budget: Option<Duration>,
}

impl RaglineConfig {
    /// Read configuration from the process environment, loading a `.env`
    /// file first when present. Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self, RagError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Some(key) = read_var("COHERE_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Some(model) = read_var("COHERE_MODEL") {
            config.embedding.model = model;
        }
        config.store.url = read_var("QDRANT_URL");
        config.store.api_key = read_var("QDRANT_API_KEY");
        if let Some(collection) = read_var("RAGLINE_COLLECTION") {
            config.store.collection = collection;
        }

        config.chunking.max_tokens = read_parsed("CHUNK_SIZE", config.chunking.max_tokens)?;
        config.chunking.overlap_tokens =
            read_parsed("CHUNK_OVERLAP", config.chunking.overlap_tokens)?;

        let timeout_secs = read_parsed("REQUEST_TIMEOUT", 30u64)?;
        config.crawl.request_timeout = Duration::from_secs(timeout_secs);
        let delay_secs = read_parsed("REQUEST_DELAY", 1.0f64)?;
        config.crawl.request_delay = Duration::from_secs_f64(delay_secs);
        config.crawl.max_retries = read_parsed("MAX_RETRIES", config.crawl.max_retries)?;
        config.crawl.max_concurrent_fetches =
            read_parsed("MAX_CONCURRENT_FETCHES", config.crawl.max_concurrent_fetches)?;

        config.retrieval.top_k = read_parsed("TOP_K", config.retrieval.top_k)?;
        config.retrieval.max_context_chars =
            read_parsed("MAX_CONTEXT_CHARS", config.retrieval.max_context_chars)?;

        if let Some(budget) = read_var("PIPELINE_BUDGET_SECS") {
            let secs: u64 = budget.parse().map_err(|_| {
                RagError::Config(format!("PIPELINE_BUDGET_SECS is not an integer: '{budget}'"))
            })?;
            config.pipeline_budget = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Check that everything required for live external services is present.
    /// Offline use (mock provider + in-memory store) needs none of it.
    pub fn validate(&self) -> Result<(), RagError> {
        let mut missing = Vec::new();
        if self.embedding.api_key.is_none() {
            missing.push("COHERE_API_KEY");
        }
        if self.store.url.is_none() {
            missing.push("QDRANT_URL");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RagError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )))
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, RagError> {
    match read_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| RagError::Config(format!("{name} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}
