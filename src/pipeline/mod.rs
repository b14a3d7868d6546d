//! End-to-end ingestion orchestration.
//!
//! The pipeline owns a run from URL list to stored vectors:
//!
//! ```text
//! Idle → Crawling → Chunking → Embedding → Storing → Done
//!                 └────────────── zero usable outputs ──► Failed
//! ```
//!
//! Per-item failures inside a stage shrink what the next stage receives and
//! show up in that stage's metrics; they never fail the run. `Failed` is
//! reserved for a stage that emits nothing at all. Retries live inside the
//! individual stage calls; the orchestrator never retries across a stage
//! boundary, and it checks the wall-clock budget only between stages.

pub mod progress;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkStrategy, Chunker, ChunkingStats};
use crate::embedding::EmbeddingClient;
use crate::ingestion::{ContentExtractor, PageFetcher};
use crate::store::{DistanceMetric, VectorStore};
use crate::types::{Chunk, ExtractedDocument, RagError, SourceRef, StoredPoint};

pub use progress::{ProgressTracker, StageMetrics};

/// Lifecycle of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Crawling,
    Chunking,
    Embedding,
    Storing,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Crawling => "crawling",
            PipelineState::Chunking => "chunking",
            PipelineState::Embedding => "embedding",
            PipelineState::Storing => "storing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Inputs for a crawl-based ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub book_id: String,
    pub urls: Vec<String>,
    pub strategy: ChunkStrategy,
    pub recreate_collection: bool,
}

impl IngestionRequest {
    pub fn new(book_id: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            book_id: book_id.into(),
            urls,
            strategy: ChunkStrategy::Sentence,
            recreate_collection: false,
        }
    }
}

/// Pre-fetched content for one book section, bypassing the crawl stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionContent {
    pub chapter: String,
    pub section: String,
    pub content: String,
}

/// Aggregate result of a run. Always produced, even on partial or total
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub state: PipelineState,
    pub stages: BTreeMap<String, StageMetrics>,
    pub chunks_stored: usize,
    pub failed_batches: usize,
    pub rejected_points: Vec<String>,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl IngestionReport {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }
}

struct StoreOutcome {
    stored: usize,
    failed_batches: usize,
    rejected: Vec<String>,
}

/// Sequences fetch → extract → chunk → embed → store.
///
/// Every collaborator is constructed by the caller and injected once; the
/// pipeline holds no ambient global state.
pub struct IngestionPipeline {
    fetcher: PageFetcher,
    extractor: ContentExtractor,
    chunker: Chunker,
    embedder: EmbeddingClient,
    store: Arc<dyn VectorStore>,
    budget: Option<Duration>,
}

impl IngestionPipeline {
    pub fn new(
        fetcher: PageFetcher,
        extractor: ContentExtractor,
        chunker: Chunker,
        embedder: EmbeddingClient,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            chunker,
            embedder,
            store,
            budget: None,
        }
    }

    /// Abort the run when total elapsed time passes `budget`. Checked
    /// between stages only; an in-flight provider call is never cut short.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Crawl, chunk, embed, and store everything behind `request.urls`.
    pub async fn run(&self, request: IngestionRequest) -> IngestionReport {
        let started = Instant::now();
        let tracker = ProgressTracker::new();
        tracing::info!(
            book_id = %request.book_id,
            urls = request.urls.len(),
            "ingestion run starting"
        );

        let outcome = self.run_inner(&request, &tracker, started).await;
        self.into_report(outcome, &tracker, started)
    }

    /// Ingest already-fetched section content, skipping the crawl stage.
    pub async fn ingest_sections(
        &self,
        book_id: &str,
        sections: Vec<SectionContent>,
        strategy: ChunkStrategy,
        recreate_collection: bool,
    ) -> IngestionReport {
        let started = Instant::now();
        let tracker = ProgressTracker::new();

        let outcome = async {
            let chunks = self.chunk_sections(book_id, &sections, strategy, &tracker)?;
            self.check_budget(started, PipelineState::Chunking)?;
            self.embed_and_store(chunks, recreate_collection, &tracker, started)
                .await
        }
        .await;

        self.into_report(outcome, &tracker, started)
    }

    async fn run_inner(
        &self,
        request: &IngestionRequest,
        tracker: &ProgressTracker,
        started: Instant,
    ) -> Result<StoreOutcome, RagError> {
        let documents = self.crawl_stage(&request.urls, tracker).await?;
        self.check_budget(started, PipelineState::Crawling)?;

        let chunks = self.chunk_documents(&request.book_id, &documents, request.strategy, tracker)?;
        self.check_budget(started, PipelineState::Chunking)?;

        self.embed_and_store(chunks, request.recreate_collection, tracker, started)
            .await
    }

    async fn crawl_stage(
        &self,
        urls: &[String],
        tracker: &ProgressTracker,
    ) -> Result<Vec<ExtractedDocument>, RagError> {
        tracker.start_stage("crawling", urls.len());

        let fetched = self.fetcher.fetch_many(urls).await;
        let mut documents = Vec::new();
        for result in fetched {
            if !result.success {
                tracker.record("crawling", false, 1);
                continue;
            }
            let document = self.extractor.extract(&result.raw_content, &result.url);
            // Fetched-but-empty is a successful crawl that simply carries
            // nothing forward.
            tracker.record("crawling", true, 1);
            if !document.is_empty() {
                documents.push(document);
            }
        }
        tracker.complete_stage("crawling");

        if documents.is_empty() {
            return Err(RagError::EmptyStage {
                stage: PipelineState::Crawling.to_string(),
            });
        }
        Ok(documents)
    }

    fn chunk_documents(
        &self,
        book_id: &str,
        documents: &[ExtractedDocument],
        strategy: ChunkStrategy,
        tracker: &ProgressTracker,
    ) -> Result<Vec<Chunk>, RagError> {
        tracker.start_stage("chunking", documents.len());
        let mut chunks = Vec::new();
        for document in documents {
            let source = SourceRef::from_url(book_id, &document.url);
            let document_chunks = self.chunker.chunk_with(&document.text, &source, strategy);
            if document_chunks.is_empty() {
                tracker.record("chunking", false, 1);
            } else {
                tracker.record("chunking", true, 1);
                chunks.extend(document_chunks);
            }
        }
        tracker.complete_stage("chunking");

        if chunks.is_empty() {
            return Err(RagError::EmptyStage {
                stage: PipelineState::Chunking.to_string(),
            });
        }
        Self::log_chunk_stats(&chunks);
        Ok(chunks)
    }

    fn chunk_sections(
        &self,
        book_id: &str,
        sections: &[SectionContent],
        strategy: ChunkStrategy,
        tracker: &ProgressTracker,
    ) -> Result<Vec<Chunk>, RagError> {
        tracker.start_stage("chunking", sections.len());
        let mut chunks = Vec::new();
        for section in sections {
            let source = SourceRef::new(book_id, &section.chapter, &section.section);
            let section_chunks = self.chunker.chunk_with(&section.content, &source, strategy);
            if section_chunks.is_empty() {
                tracker.record("chunking", false, 1);
            } else {
                tracker.record("chunking", true, 1);
                chunks.extend(section_chunks);
            }
        }
        tracker.complete_stage("chunking");

        if chunks.is_empty() {
            return Err(RagError::EmptyStage {
                stage: PipelineState::Chunking.to_string(),
            });
        }
        Self::log_chunk_stats(&chunks);
        Ok(chunks)
    }

    async fn embed_and_store(
        &self,
        chunks: Vec<Chunk>,
        recreate_collection: bool,
        tracker: &ProgressTracker,
        started: Instant,
    ) -> Result<StoreOutcome, RagError> {
        tracker.start_stage("embedding", chunks.len());
        let embedded = self.embedder.embed_chunks(&chunks).await;
        tracker.record("embedding", true, embedded.embedded.len());
        tracker.record("embedding", false, embedded.failed_items());
        tracker.complete_stage("embedding");

        if embedded.embedded.is_empty() {
            return Err(RagError::EmptyStage {
                stage: PipelineState::Embedding.to_string(),
            });
        }
        self.check_budget(started, PipelineState::Embedding)?;

        // Collection shape comes from what the provider actually produced.
        let dimensions = embedded.embedded[0].dimensions();
        self.store
            .ensure_collection(dimensions, DistanceMetric::Cosine, recreate_collection)
            .await?;

        // Correlate embeddings with chunks by id, never by array position.
        let by_id: HashMap<&str, &Chunk> =
            chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
        let mut points = Vec::new();
        let mut pairing_rejects = Vec::new();
        for embedding in &embedded.embedded {
            let Some(chunk) = by_id.get(embedding.chunk_id.as_str()) else {
                tracing::warn!(chunk_id = %embedding.chunk_id, "embedding without matching chunk");
                pairing_rejects.push(embedding.chunk_id.clone());
                continue;
            };
            match StoredPoint::from_parts(chunk, embedding) {
                Ok(point) => points.push(point),
                Err(err) => {
                    tracing::warn!(chunk_id = %embedding.chunk_id, error = %err, "dropping point");
                    pairing_rejects.push(embedding.chunk_id.clone());
                }
            }
        }

        tracker.start_stage("storing", points.len());
        let total_points = points.len();
        let upsert = self.store.upsert(points).await?;
        tracker.record("storing", true, upsert.stored_count);
        tracker.record(
            "storing",
            false,
            total_points.saturating_sub(upsert.stored_count),
        );
        tracker.complete_stage("storing");

        if upsert.stored_count == 0 {
            return Err(RagError::EmptyStage {
                stage: PipelineState::Storing.to_string(),
            });
        }

        let mut rejected = upsert.rejected;
        rejected.extend(pairing_rejects);
        Ok(StoreOutcome {
            stored: upsert.stored_count,
            failed_batches: upsert.failed_batches,
            rejected,
        })
    }

    fn log_chunk_stats(chunks: &[Chunk]) {
        let stats = ChunkingStats::from_chunks(chunks);
        tracing::info!(
            total_chunks = stats.total_chunks,
            total_tokens = stats.total_tokens,
            avg_tokens = format!("{:.1}", stats.avg_tokens),
            min_tokens = stats.min_tokens,
            max_tokens = stats.max_tokens,
            "chunking stage summary"
        );
    }

    fn check_budget(&self, started: Instant, stage: PipelineState) -> Result<(), RagError> {
        if let Some(budget) = self.budget {
            if started.elapsed() > budget {
                return Err(RagError::BudgetExceeded {
                    stage: stage.to_string(),
                    budget_secs: budget.as_secs(),
                });
            }
        }
        Ok(())
    }

    fn into_report(
        &self,
        outcome: Result<StoreOutcome, RagError>,
        tracker: &ProgressTracker,
        started: Instant,
    ) -> IngestionReport {
        let elapsed_secs = started.elapsed().as_secs_f64();
        match outcome {
            Ok(stored) => {
                tracing::info!(
                    chunks_stored = stored.stored,
                    failed_batches = stored.failed_batches,
                    elapsed_secs,
                    "ingestion run complete"
                );
                IngestionReport {
                    state: PipelineState::Done,
                    stages: tracker.all_metrics(),
                    chunks_stored: stored.stored,
                    failed_batches: stored.failed_batches,
                    rejected_points: stored.rejected,
                    elapsed_secs,
                    error: None,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, elapsed_secs, "ingestion run failed");
                IngestionReport {
                    state: PipelineState::Failed,
                    stages: tracker.all_metrics(),
                    chunks_stored: 0,
                    failed_batches: 0,
                    rejected_points: Vec::new(),
                    elapsed_secs,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, CrawlConfig};
    use crate::embedding::MockEmbeddingProvider;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;

    fn pipeline(store: Arc<dyn VectorStore>) -> IngestionPipeline {
        let fetcher = PageFetcher::new(&CrawlConfig::default()).unwrap();
        let extractor = ContentExtractor::new().unwrap();
        let chunker = Chunker::new(ChunkingConfig {
            max_tokens: 12,
            overlap_tokens: 0,
            min_tokens: 1,
        });
        let embedder = EmbeddingClient::new(
            Arc::new(MockEmbeddingProvider::new()),
            RetryPolicy::none(),
        );
        IngestionPipeline::new(fetcher, extractor, chunker, embedder, store)
    }

    fn sections() -> Vec<SectionContent> {
        vec![
            SectionContent {
                chapter: "ch01".into(),
                section: "intro".into(),
                content: "Ownership is central. Borrowing builds on it. Lifetimes close the loop."
                    .into(),
            },
            SectionContent {
                chapter: "ch02".into(),
                section: "traits".into(),
                content: "Traits describe shared behavior. Implementations attach it to types."
                    .into(),
            },
        ]
    }

    #[tokio::test]
    async fn section_ingestion_reaches_done() {
        let store = Arc::new(MemoryStore::new());
        let report = pipeline(store.clone())
            .ingest_sections("book", sections(), ChunkStrategy::Sentence, false)
            .await;

        assert_eq!(report.state, PipelineState::Done);
        assert!(report.chunks_stored > 0);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(store.count().await.unwrap(), report.chunks_stored);
        assert!(report.stages.contains_key("chunking"));
        assert!(report.stages.contains_key("embedding"));
        assert!(report.stages.contains_key("storing"));
    }

    #[tokio::test]
    async fn empty_sections_fail_at_chunking() {
        let store = Arc::new(MemoryStore::new());
        let report = pipeline(store)
            .ingest_sections(
                "book",
                vec![SectionContent {
                    chapter: "ch01".into(),
                    section: "blank".into(),
                    content: "   ".into(),
                }],
                ChunkStrategy::Sentence,
                false,
            )
            .await;

        assert_eq!(report.state, PipelineState::Failed);
        let error = report.error.unwrap();
        assert!(error.contains("chunking"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn per_item_failures_do_not_fail_the_run() {
        let store = Arc::new(MemoryStore::new());
        let mut sections = sections();
        sections.push(SectionContent {
            chapter: "ch03".into(),
            section: "empty".into(),
            content: String::new(),
        });

        let report = pipeline(store)
            .ingest_sections("book", sections, ChunkStrategy::Sentence, false)
            .await;

        assert_eq!(report.state, PipelineState::Done);
        let chunking = &report.stages["chunking"];
        assert_eq!(chunking.items_processed, 3);
        assert_eq!(chunking.items_failed, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_aborts_between_stages() {
        let store = Arc::new(MemoryStore::new());
        let report = pipeline(store)
            .with_budget(Duration::ZERO)
            .ingest_sections("book", sections(), ChunkStrategy::Sentence, false)
            .await;

        assert_eq!(report.state, PipelineState::Failed);
        assert!(report.error.unwrap().contains("budget"));
        // Chunking already ran; its metrics survive in the report.
        assert!(report.stages.contains_key("chunking"));
    }
}
