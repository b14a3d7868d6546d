//! Core records exchanged between pipeline stages, plus the shared error type.
//!
//! Every stage hands its output forward by value as one of these immutable
//! records; nothing here is shared mutably across stages. Payload-bearing
//! types validate themselves at stage boundaries so malformed data is caught
//! before it reaches the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Namespace UUID for deriving deterministic point ids from chunk ids.
///
/// `Uuid::new_v5(&POINT_ID_NAMESPACE, chunk_id)` is a pure function of the
/// chunk id, so re-ingesting identical content upserts the same points
/// instead of accumulating duplicates.
pub const POINT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x8f1a_62d4_31b7_4c0e_9b5a_7d2e_c4f8_a913);

/// Errors surfaced by ragline components.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Connection failure, timeout, or retryable HTTP status that survived
    /// every retry attempt. Downgraded by callers to a per-item failure.
    #[error("transient failure talking to {endpoint}: {reason}")]
    Transient { endpoint: String, reason: String },

    /// Malformed chunk, schema-violating payload, or dimensionality
    /// mismatch. Fatal for the offending item, never retried.
    #[error("validation failed for '{id}': {reason}")]
    Validation { id: String, reason: String },

    /// Non-rate-limit provider rejection. Fatal for the batch; the run
    /// continues with the remaining batches.
    #[error("provider rejected batch starting at item {batch_start}: {reason}")]
    Provider { batch_start: usize, reason: String },

    /// A pipeline stage produced zero usable outputs.
    #[error("stage '{stage}' produced no usable output")]
    EmptyStage { stage: String },

    /// The orchestrator's wall-clock budget ran out between stages.
    #[error("pipeline exceeded wall-clock budget of {budget_secs}s after stage '{stage}'")]
    BudgetExceeded { stage: String, budget_secs: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Returns `true` for errors that represent exhausted transient
    /// conditions rather than permanent rejections.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient { .. })
    }
}

/// Classified reason a page fetch did not produce usable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailure {
    /// The request timed out on every attempt.
    Timeout,
    /// A connection could not be established.
    Connect,
    /// The server answered with a non-success status that is not retryable.
    Status(u16),
    /// Retryable statuses kept coming back until the attempt ceiling.
    RetriesExhausted { attempts: u32, last_status: Option<u16> },
    /// The input was not a fetchable http(s) URL.
    InvalidUrl(String),
    /// Anything else the HTTP client reported.
    Other(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Timeout => write!(f, "request timed out"),
            FetchFailure::Connect => write!(f, "connection failed"),
            FetchFailure::Status(code) => write!(f, "unexpected status {code}"),
            FetchFailure::RetriesExhausted {
                attempts,
                last_status,
            } => match last_status {
                Some(code) => write!(f, "retries exhausted after {attempts} attempts (last status {code})"),
                None => write!(f, "retries exhausted after {attempts} attempts"),
            },
            FetchFailure::InvalidUrl(raw) => write!(f, "invalid url '{raw}'"),
            FetchFailure::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Outcome of fetching a single URL. Produced once, consumed once.
#[derive(Debug, Clone)]
pub struct PageFetchResult {
    pub url: Url,
    pub raw_content: String,
    pub http_status: Option<u16>,
    pub success: bool,
    pub error: Option<FetchFailure>,
}

impl PageFetchResult {
    pub fn success(url: Url, raw_content: String, http_status: u16) -> Self {
        Self {
            url,
            raw_content,
            http_status: Some(http_status),
            success: true,
            error: None,
        }
    }

    pub fn failure(url: Url, http_status: Option<u16>, error: FetchFailure) -> Self {
        Self {
            url,
            raw_content: String::new(),
            http_status,
            success: false,
            error: Some(error),
        }
    }
}

/// A heading observed in a source page, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// 1..=6, from the `hN` element name.
    pub level: u8,
    pub text: String,
    /// Index within the sequence of headings on the page.
    pub position: usize,
}

/// Clean text pulled out of a fetched page.
///
/// An empty `text` is a valid result: the page was fetched and parsed but
/// held no main content after boilerplate removal. That is distinct from a
/// fetch failure, which never reaches extraction.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub url: Url,
    pub title: String,
    pub text: String,
    pub headings: Vec<Heading>,
    pub metadata: serde_json::Value,
}

impl ExtractedDocument {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Where a chunk came from within the indexed corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub book_id: String,
    pub chapter: String,
    pub section: String,
}

impl SourceRef {
    pub fn new(
        book_id: impl Into<String>,
        chapter: impl Into<String>,
        section: impl Into<String>,
    ) -> Self {
        Self {
            book_id: book_id.into(),
            chapter: chapter.into(),
            section: section.into(),
        }
    }

    /// Derive chapter and section from a documentation URL's trailing path
    /// segments. `https://docs.example.com/book/ch04/ownership` maps to
    /// chapter `ch04`, section `ownership`; missing segments fall back to
    /// `root`/`index` so the id stays well-formed.
    pub fn from_url(book_id: impl Into<String>, url: &Url) -> Self {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|parts| parts.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let section = segments
            .last()
            .map(|s| s.trim_end_matches(".html"))
            .filter(|s| !s.is_empty())
            .unwrap_or("index");
        let chapter = if segments.len() >= 2 {
            segments[segments.len() - 2]
        } else {
            "root"
        };
        Self::new(book_id, chapter, section)
    }

    /// Stable chunk id for a given position within this source group.
    ///
    /// Pure function of `(book_id, chapter, section, order)`; re-chunking
    /// identical content yields identical ids.
    pub fn chunk_id(&self, order: usize) -> String {
        format!("{}:{}:{}:{:04}", self.book_id, self.chapter, self.section, order)
    }
}

/// A bounded, retrievable unit of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub source: SourceRef,
    pub chunk_order: usize,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source: SourceRef, chunk_order: usize) -> Self {
        let chunk_id = source.chunk_id(chunk_order);
        Self {
            chunk_id,
            content: content.into(),
            source,
            chunk_order,
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Deterministic point id for the vector store.
    pub fn point_id(&self) -> Uuid {
        Uuid::new_v5(&POINT_ID_NAMESPACE, self.chunk_id.as_bytes())
    }

    /// Whitespace-word token approximation used by chunking and validation.
    pub fn token_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Fixed-length vector produced for one chunk or query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub chunk_id: String,
    pub model_name: String,
}

impl EmbeddingVector {
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// Payload persisted alongside every vector in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub content: String,
    pub source_chapter: String,
    pub source_section: String,
    pub chunk_order: usize,
    pub chunk_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PointPayload {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let mut extra = serde_json::Map::new();
        extra.insert(
            "book_id".to_string(),
            serde_json::Value::String(chunk.source.book_id.clone()),
        );
        if !chunk.metadata.is_null() {
            extra.insert("chunk_metadata".to_string(), chunk.metadata.clone());
        }
        Self {
            content: chunk.content.clone(),
            source_chapter: chunk.source.chapter.clone(),
            source_section: chunk.source.section.clone(),
            chunk_order: chunk.chunk_order,
            chunk_id: chunk.chunk_id.clone(),
            created_at: Utc::now(),
            extra,
        }
    }

    /// Schema check applied before any network call.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.content.trim().is_empty() {
            return Err(RagError::Validation {
                id: self.chunk_id.clone(),
                reason: "payload content is empty".into(),
            });
        }
        if self.chunk_id.trim().is_empty() {
            return Err(RagError::Validation {
                id: "<missing>".into(),
                reason: "payload chunk_id is empty".into(),
            });
        }
        if self.source_chapter.trim().is_empty() {
            return Err(RagError::Validation {
                id: self.chunk_id.clone(),
                reason: "payload source_chapter is empty".into(),
            });
        }
        if self.source_section.trim().is_empty() {
            return Err(RagError::Validation {
                id: self.chunk_id.clone(),
                reason: "payload source_section is empty".into(),
            });
        }
        Ok(())
    }
}

/// One point ready to be written to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    pub point_id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl StoredPoint {
    /// Assemble a point from a chunk and its embedding, rejecting pairs
    /// whose chunk ids disagree.
    pub fn from_parts(chunk: &Chunk, embedding: &EmbeddingVector) -> Result<Self, RagError> {
        if chunk.chunk_id != embedding.chunk_id {
            return Err(RagError::Validation {
                id: chunk.chunk_id.clone(),
                reason: format!(
                    "embedding belongs to '{}', not this chunk",
                    embedding.chunk_id
                ),
            });
        }
        let payload = PointPayload::from_chunk(chunk);
        payload.validate()?;
        Ok(Self {
            point_id: chunk.point_id(),
            vector: embedding.vector.clone(),
            payload,
        })
    }
}

/// One hit from a similarity search. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// Outcome of checking a generated answer against its supplied context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// 1.0 means every response token traces to the context.
    pub alignment_score: f32,
    pub is_aligned: bool,
    /// Response tokens (length > 3) absent from the context.
    pub flagged_tokens: Vec<String>,
    /// Uncertain-language patterns spotted in the response. Informational
    /// only; never changes `is_aligned`.
    pub uncertainty_flags: Vec<String>,
}
