//! Vector storage behind a narrow, swappable interface.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorStore trait│
//!                  │   (async CRUD)   │
//!                  └────────┬─────────┘
//!                           │
//!              ┌────────────┴────────────┐
//!              ▼                         ▼
//!       ┌─────────────┐          ┌──────────────┐
//!       │ QdrantStore │          │ MemoryStore  │
//!       │  REST API   │          │ tests/offline│
//!       └─────────────┘          └──────────────┘
//! ```
//!
//! Payloads are validated before any network call; schema violations never
//! leave the process. Collection recreation must not run concurrently with
//! upsert or search against the same collection — callers sequence those.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PointPayload, RagError, RetrievalResult, StoredPoint};

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

/// Distance metric used by the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclid,
    Dot,
}

impl DistanceMetric {
    /// Wire name understood by the vector database.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::Euclid => "Euclid",
            DistanceMetric::Dot => "Dot",
        }
    }
}

/// Equality filter over payload source fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub chapter: Option<String>,
    pub section: Option<String>,
}

impl SearchFilter {
    pub fn chapter(chapter: impl Into<String>) -> Self {
        Self {
            chapter: Some(chapter.into()),
            section: None,
        }
    }

    pub fn chapter_section(chapter: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            chapter: Some(chapter.into()),
            section: Some(section.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chapter.is_none() && self.section.is_none()
    }

    /// `true` when `payload` passes every present condition.
    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(chapter) = &self.chapter {
            if &payload.source_chapter != chapter {
                return false;
            }
        }
        if let Some(section) = &self.section {
            if &payload.source_section != section {
                return false;
            }
        }
        true
    }
}

/// Outcome of a batched upsert: partial success is reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// Points accepted by the store.
    pub stored_count: usize,
    /// Batches that failed after their retries were exhausted.
    pub failed_batches: usize,
    /// Chunk ids rejected by payload/dimension validation before any
    /// network call was made.
    pub rejected: Vec<String>,
}

impl UpsertReport {
    pub fn failed_count(&self, total: usize) -> usize {
        total.saturating_sub(self.stored_count + self.rejected.len())
    }
}

/// Narrow interface to the external similarity-search database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if needed. A no-op when an equivalent
    /// collection (same dimensionality and metric) already exists and
    /// `recreate` is false; `recreate` drops and rebuilds it.
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: DistanceMetric,
        recreate: bool,
    ) -> Result<(), RagError>;

    /// Write points in fixed-size batches, each retried independently.
    /// A batch that fails after retry exhaustion is recorded in the report
    /// and processing continues with the remaining batches.
    async fn upsert(&self, points: Vec<StoredPoint>) -> Result<UpsertReport, RagError>;

    /// Nearest-neighbor search: best score first, at most `top_k` results,
    /// every score at or above `score_threshold` when one is given.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError>;

    /// Remove points by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[Uuid]) -> Result<(), RagError>;

    /// Replace one point. Implemented as delete-then-insert; callers must
    /// not assume atomicity.
    async fn update(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        payload: PointPayload,
    ) -> Result<(), RagError>;

    /// Number of points currently stored.
    async fn count(&self) -> Result<usize, RagError>;
}

/// Split `points` into validated batches, collecting rejects up front.
///
/// Shared by store implementations so schema violations and dimensionality
/// mismatches are caught before anything touches the wire.
pub(crate) fn validate_and_batch(
    points: Vec<StoredPoint>,
    expected_dims: Option<usize>,
    batch_size: usize,
) -> (Vec<Vec<StoredPoint>>, Vec<String>) {
    let mut rejected = Vec::new();
    let mut valid = Vec::new();

    for point in points {
        if let Err(err) = point.payload.validate() {
            tracing::warn!(chunk_id = %point.payload.chunk_id, error = %err, "rejecting point");
            rejected.push(point.payload.chunk_id.clone());
            continue;
        }
        if let Some(dims) = expected_dims {
            if point.vector.len() != dims {
                tracing::warn!(
                    chunk_id = %point.payload.chunk_id,
                    got = point.vector.len(),
                    expected = dims,
                    "rejecting point with wrong dimensionality"
                );
                rejected.push(point.payload.chunk_id.clone());
                continue;
            }
        }
        valid.push(point);
    }

    let batch_size = batch_size.max(1);
    let batches = valid
        .chunks(batch_size)
        .map(|batch| batch.to_vec())
        .collect();
    (batches, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, EmbeddingVector, SourceRef};

    fn point(order: usize, dims: usize) -> StoredPoint {
        let chunk = Chunk::new(
            format!("content {order}"),
            SourceRef::new("book", "ch01", "intro"),
            order,
        );
        let embedding = EmbeddingVector {
            vector: vec![0.1; dims],
            chunk_id: chunk.chunk_id.clone(),
            model_name: "mock".into(),
        };
        StoredPoint::from_parts(&chunk, &embedding).unwrap()
    }

    #[test]
    fn batching_respects_batch_size() {
        let points: Vec<_> = (0..10).map(|i| point(i, 4)).collect();
        let (batches, rejected) = validate_and_batch(points, Some(4), 4);
        assert!(rejected.is_empty());
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn dimension_mismatch_is_rejected_before_batching() {
        let mut points: Vec<_> = (0..3).map(|i| point(i, 4)).collect();
        points.push(point(3, 7));
        let (batches, rejected) = validate_and_batch(points, Some(4), 10);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(rejected, vec!["book:ch01:intro:0003".to_string()]);
    }

    #[test]
    fn blank_payload_is_rejected() {
        let mut bad = point(0, 4);
        bad.payload.content = String::new();
        let (batches, rejected) = validate_and_batch(vec![bad, point(1, 4)], None, 10);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn filter_matches_on_present_fields() {
        let payload = PointPayload::from_chunk(&Chunk::new(
            "text",
            SourceRef::new("book", "ch02", "traits"),
            0,
        ));
        assert!(SearchFilter::chapter("ch02").matches(&payload));
        assert!(!SearchFilter::chapter("ch03").matches(&payload));
        assert!(SearchFilter::chapter_section("ch02", "traits").matches(&payload));
        assert!(!SearchFilter::chapter_section("ch02", "other").matches(&payload));
        assert!(SearchFilter::default().matches(&payload));
    }
}
