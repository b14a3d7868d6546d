//! ragline: documentation pages in, citation-grounded answers out.
//!
//! ```text
//! URLs ──► ingestion::PageFetcher ──► ingestion::ContentExtractor
//!                                               │
//!                                               ▼
//!                      chunking::Chunker ──► Vec<Chunk> (deterministic ids)
//!                                               │
//!                                               ▼
//!                  embedding::EmbeddingClient ──► EmbeddingVector batches
//!                                               │
//!                                               ▼
//!                     store::VectorStore ──► one point per chunk
//!
//! Query ──► retrieval::RetrievalService ──► search ──► context ──► answer
//!                                     └─► validation::AlignmentValidator
//! ```
//!
//! The [`pipeline::IngestionPipeline`] sequences the forward path and owns
//! per-stage metrics; retrieval runs the reverse path over the same
//! embedding client and store. Both ends reach external services only
//! through narrow traits ([`embedding::EmbeddingProvider`],
//! [`store::VectorStore`], [`retrieval::AnswerProvider`]).

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod ingestion;
pub mod pipeline;
pub mod retrieval;
pub mod retry;
pub mod store;
pub mod types;

pub use chunking::{ChunkStrategy, Chunker};
pub use config::RaglineConfig;
pub use embedding::{EmbeddingClient, EmbeddingProvider, MockEmbeddingProvider};
pub use pipeline::{IngestionPipeline, IngestionReport, IngestionRequest, PipelineState};
pub use retrieval::{AnswerRequest, AnswerResponse, QueryMode, RetrievalService};
pub use retry::RetryPolicy;
pub use store::{DistanceMetric, MemoryStore, QdrantStore, SearchFilter, VectorStore};
pub use types::{Chunk, RagError, SourceRef};
