//! Query-time retrieval, context assembly, and answer validation.
//!
//! Two modes share one path: book-wide embeds the query and searches the
//! vector store; selected-text skips search entirely and treats the
//! user-supplied text as the only context chunk. Either way the service
//! always returns an [`AnswerResponse`] — an empty context is a normal
//! outcome that yields the fixed insufficient-context message without a
//! single generative call.

pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::store::{SearchFilter, VectorStore};
use crate::types::{PointPayload, RagError, RetrievalResult, ValidationVerdict};

pub use validation::AlignmentValidator;

/// Fixed reply when no usable context exists for a query.
pub const INSUFFICIENT_CONTEXT_MESSAGE: &str =
    "The requested information is not available in the provided content.";

/// How context for a query is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    /// Retrieval over the full indexed corpus.
    BookWide,
    /// Retrieval restricted to user-supplied text only.
    SelectedText,
}

/// Generative completion provider. Only Retrieval talks to it.
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    async fn complete(
        &self,
        instruction: &str,
        context: &str,
        history: &[String],
    ) -> Result<String, RagError>;
}

/// One query for the service.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub mode: QueryMode,
    /// Required context for [`QueryMode::SelectedText`]; ignored otherwise.
    pub selected_text: Option<String>,
    pub history: Vec<String>,
    /// Optional chapter/section restriction for book-wide search.
    pub filter: Option<SearchFilter>,
}

impl AnswerRequest {
    pub fn book_wide(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: QueryMode::BookWide,
            selected_text: None,
            history: Vec::new(),
            filter: None,
        }
    }

    pub fn selected_text(query: impl Into<String>, selected: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: QueryMode::SelectedText,
            selected_text: Some(selected.into()),
            history: Vec::new(),
            filter: None,
        }
    }
}

/// Citation handed back with an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub chapter: String,
    pub section: String,
    pub snippet: String,
}

/// The service's invariant output shape: always a response, never an error
/// for "nothing found".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub response: String,
    pub sources: Vec<SourceCitation>,
    pub mode: QueryMode,
    pub verdict: ValidationVerdict,
    pub context_chunks_used: usize,
}

/// Embeds queries, searches the store, assembles bounded context, and
/// validates what the generative provider produced.
pub struct RetrievalService {
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    answers: Arc<dyn AnswerProvider>,
    validator: AlignmentValidator,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        answers: Arc<dyn AnswerProvider>,
        config: RetrievalConfig,
    ) -> Result<Self, RagError> {
        let validator = AlignmentValidator::new(&config)?;
        Ok(Self {
            embedder,
            store,
            answers,
            validator,
            config,
        })
    }

    /// Answer `request.query` in the requested mode.
    pub async fn search_and_answer(
        &self,
        request: AnswerRequest,
    ) -> Result<AnswerResponse, RagError> {
        let context_chunks = match request.mode {
            QueryMode::SelectedText => selected_text_context(request.selected_text.as_deref()),
            QueryMode::BookWide => self.search_context(&request).await?,
        };
        self.answer_with_context(&request, context_chunks).await
    }

    /// Raw search without answer generation, for callers that only want
    /// the ranked chunks.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let query_vector = self.embedder.embed_query(query).await?;
        self.store
            .search(
                &query_vector,
                self.config.top_k,
                self.config.score_threshold,
                filter,
            )
            .await
    }

    async fn search_context(
        &self,
        request: &AnswerRequest,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let results = self
            .retrieve(&request.query, request.filter.as_ref())
            .await?;
        tracing::debug!(
            hits = results.len(),
            top_k = self.config.top_k,
            "book-wide retrieval finished"
        );
        Ok(results)
    }

    async fn answer_with_context(
        &self,
        request: &AnswerRequest,
        context_chunks: Vec<RetrievalResult>,
    ) -> Result<AnswerResponse, RagError> {
        let (context, used) = self.assemble_context(&context_chunks, request.mode);

        if context.trim().is_empty() {
            // The fixed fallback; the generative provider is never invoked.
            tracing::info!(mode = ?request.mode, "no usable context, returning fixed message");
            return Ok(AnswerResponse {
                response: INSUFFICIENT_CONTEXT_MESSAGE.to_string(),
                sources: Vec::new(),
                mode: request.mode,
                verdict: ValidationVerdict {
                    alignment_score: 1.0,
                    is_aligned: true,
                    flagged_tokens: Vec::new(),
                    uncertainty_flags: Vec::new(),
                },
                context_chunks_used: 0,
            });
        }

        let instruction = build_instruction(request.mode, &request.query);
        let response = self
            .answers
            .complete(&instruction, &context, &request.history)
            .await?;

        let verdict = self.validator.validate(&response, &context, request.mode);

        let sources = context_chunks
            .iter()
            .take(used)
            .map(|chunk| SourceCitation {
                chapter: chunk.payload.source_chapter.clone(),
                section: chunk.payload.source_section.clone(),
                snippet: snippet(&chunk.payload.content, 200),
            })
            .collect();

        Ok(AnswerResponse {
            response,
            sources,
            mode: request.mode,
            verdict,
            context_chunks_used: used,
        })
    }

    /// Concatenate chunk contents in the given order, stopping before any
    /// chunk that would push the context past the configured maximum. The
    /// overflowing chunk is dropped whole, never truncated mid-chunk.
    fn assemble_context(&self, chunks: &[RetrievalResult], mode: QueryMode) -> (String, usize) {
        let mut parts: Vec<String> = Vec::new();
        let mut total = 0usize;
        let mut used = 0usize;

        for chunk in chunks {
            let formatted = match mode {
                QueryMode::SelectedText => chunk.payload.content.clone(),
                QueryMode::BookWide => format!(
                    "[Source: {} - {}] {}",
                    chunk.payload.source_chapter,
                    chunk.payload.source_section,
                    chunk.payload.content
                ),
            };
            let addition = formatted.len() + if parts.is_empty() { 0 } else { 2 };
            if total + addition > self.config.max_context_chars {
                break;
            }
            total += addition;
            parts.push(formatted);
            used += 1;
        }

        (parts.join("\n\n"), used)
    }
}

fn selected_text_context(selected: Option<&str>) -> Vec<RetrievalResult> {
    let Some(text) = selected.map(str::trim).filter(|text| !text.is_empty()) else {
        return Vec::new();
    };
    // One synthetic chunk standing in for a stored point.
    vec![RetrievalResult {
        id: "selected-text".to_string(),
        score: 1.0,
        payload: PointPayload {
            content: text.to_string(),
            source_chapter: "selected".to_string(),
            source_section: "text".to_string(),
            chunk_order: 0,
            chunk_id: "selected:text:0000".to_string(),
            created_at: Utc::now(),
            extra: serde_json::Map::new(),
        },
    }]
}

fn build_instruction(mode: QueryMode, query: &str) -> String {
    match mode {
        QueryMode::SelectedText => format!(
            "Answer using only the selected text below. Do not use any other \
             knowledge. If the text does not contain the answer, reply exactly: \
             \"{INSUFFICIENT_CONTEXT_MESSAGE}\"\n\nQuestion: {query}"
        ),
        QueryMode::BookWide => format!(
            "Answer using only the provided book context. Cite the chapter and \
             section where possible. If the context does not cover the question, \
             say that it is not covered by the book.\n\nQuestion: {query}"
        ),
    }
}

fn snippet(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::MockEmbeddingProvider;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the context back, counting invocations.
    struct EchoProvider {
        calls: AtomicUsize,
    }

    impl EchoProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AnswerProvider for EchoProvider {
        async fn complete(
            &self,
            _instruction: &str,
            context: &str,
            _history: &[String],
        ) -> Result<String, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(context.to_string())
        }
    }

    fn service(
        provider: Arc<EchoProvider>,
        config: RetrievalConfig,
    ) -> (RetrievalService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(EmbeddingClient::new(
            Arc::new(MockEmbeddingProvider::new()),
            RetryPolicy::none(),
        ));
        let service =
            RetrievalService::new(embedder, store.clone(), provider, config).unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn empty_selected_text_returns_fixed_message_without_generation() {
        let provider = EchoProvider::new();
        let (service, _) = service(provider.clone(), RetrievalConfig::default());

        let response = service
            .search_and_answer(AnswerRequest::selected_text("What is ownership?", ""))
            .await
            .unwrap();

        assert_eq!(response.response, INSUFFICIENT_CONTEXT_MESSAGE);
        assert!(response.sources.is_empty());
        assert_eq!(response.context_chunks_used, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn selected_text_becomes_the_sole_context() {
        let provider = EchoProvider::new();
        let (service, _) = service(provider.clone(), RetrievalConfig::default());

        let response = service
            .search_and_answer(AnswerRequest::selected_text(
                "What moves?",
                "Ownership moves values between bindings.",
            ))
            .await
            .unwrap();

        assert!(response.response.contains("Ownership moves values"));
        assert_eq!(response.context_chunks_used, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].chapter, "selected");
        assert!(response.verdict.is_aligned);
    }

    #[tokio::test]
    async fn book_wide_with_empty_store_still_returns_a_response() {
        let provider = EchoProvider::new();
        let (service, store) = service(provider.clone(), RetrievalConfig::default());
        store
            .ensure_collection(8, crate::store::DistanceMetric::Cosine, false)
            .await
            .unwrap();

        let response = service
            .search_and_answer(AnswerRequest::book_wide("Anything indexed?"))
            .await
            .unwrap();

        assert_eq!(response.response, INSUFFICIENT_CONTEXT_MESSAGE);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_chunk_is_dropped_whole() {
        let provider = EchoProvider::new();
        let config = RetrievalConfig {
            max_context_chars: 60,
            ..RetrievalConfig::default()
        };
        let (service, _) = service(provider, config);

        let chunks = vec![
            RetrievalResult {
                id: "a".into(),
                score: 0.9,
                payload: PointPayload {
                    content: "short first chunk".into(),
                    source_chapter: "ch1".into(),
                    source_section: "s1".into(),
                    chunk_order: 0,
                    chunk_id: "b:ch1:s1:0000".into(),
                    created_at: Utc::now(),
                    extra: serde_json::Map::new(),
                },
            },
            RetrievalResult {
                id: "b".into(),
                score: 0.8,
                payload: PointPayload {
                    content: "this much longer second chunk would overflow the context budget"
                        .into(),
                    source_chapter: "ch1".into(),
                    source_section: "s2".into(),
                    chunk_order: 1,
                    chunk_id: "b:ch1:s2:0000".into(),
                    created_at: Utc::now(),
                    extra: serde_json::Map::new(),
                },
            },
        ];

        let (context, used) = service.assemble_context(&chunks, QueryMode::SelectedText);
        assert_eq!(used, 1);
        assert!(context.contains("short first chunk"));
        assert!(!context.contains("second chunk"));
        // Nothing was truncated mid-chunk.
        assert!(!context.ends_with("would"));
    }

    #[tokio::test]
    async fn book_wide_context_carries_source_tags() {
        let provider = EchoProvider::new();
        let (service, _) = service(provider, RetrievalConfig::default());
        let chunks = vec![RetrievalResult {
            id: "a".into(),
            score: 0.9,
            payload: PointPayload {
                content: "Traits describe behavior.".into(),
                source_chapter: "ch10".into(),
                source_section: "traits".into(),
                chunk_order: 0,
                chunk_id: "b:ch10:traits:0000".into(),
                created_at: Utc::now(),
                extra: serde_json::Map::new(),
            },
        }];
        let (context, _) = service.assemble_context(&chunks, QueryMode::BookWide);
        assert!(context.starts_with("[Source: ch10 - traits]"));
    }

    #[test]
    fn snippets_are_bounded() {
        let long = "x".repeat(500);
        let short = snippet(&long, 200);
        assert_eq!(short.chars().count(), 203);
        assert!(short.ends_with("..."));
        assert_eq!(snippet("tiny", 200), "tiny");
    }
}
