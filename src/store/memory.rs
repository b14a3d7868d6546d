//! In-process [`VectorStore`] used by tests and offline runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::{PointPayload, RagError, RetrievalResult, StoredPoint};

use super::{DistanceMetric, SearchFilter, UpsertReport, VectorStore, validate_and_batch};

#[derive(Default)]
struct Inner {
    dimensions: Option<usize>,
    distance: DistanceMetric,
    points: HashMap<Uuid, (Vec<f32>, PointPayload)>,
}

/// Exact-scan vector store with the same contract as the remote one.
///
/// Scoring follows the configured metric (cosine by default). Upserts
/// replace by id, which is what makes re-ingestion idempotent.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    batch_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            batch_size: 64,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn score(distance: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
        match distance {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => dot(a, b),
            DistanceMetric::Euclid => {
                // Negated distance keeps "higher is better" ordering.
                let sum: f32 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum();
                -sum.sqrt()
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product = dot(a, b);
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: DistanceMetric,
        recreate: bool,
    ) -> Result<(), RagError> {
        let mut inner = self.inner.write();
        match inner.dimensions {
            Some(existing) if !recreate => {
                if existing != dimensions || inner.distance != distance {
                    return Err(RagError::Storage(format!(
                        "collection exists with {existing} dims, wanted {dimensions}"
                    )));
                }
            }
            _ => {
                if recreate {
                    inner.points.clear();
                }
                inner.dimensions = Some(dimensions);
                inner.distance = distance;
            }
        }
        Ok(())
    }

    async fn upsert(&self, points: Vec<StoredPoint>) -> Result<UpsertReport, RagError> {
        let expected_dims = self.inner.read().dimensions;
        let (batches, rejected) = validate_and_batch(points, expected_dims, self.batch_size);

        let mut report = UpsertReport {
            rejected,
            ..UpsertReport::default()
        };
        let mut inner = self.inner.write();
        for batch in batches {
            for point in batch {
                inner
                    .points
                    .insert(point.point_id, (point.vector, point.payload));
                report.stored_count += 1;
            }
        }
        Ok(report)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let inner = self.inner.read();
        let mut results: Vec<RetrievalResult> = inner
            .points
            .iter()
            .filter(|(_, (_, payload))| filter.is_none_or(|f| f.matches(payload)))
            .map(|(id, (vector, payload))| RetrievalResult {
                id: id.to_string(),
                score: Self::score(inner.distance, query_vector, vector),
                payload: payload.clone(),
            })
            .filter(|result| score_threshold.is_none_or(|threshold| result.score >= threshold))
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), RagError> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.points.remove(id);
        }
        Ok(())
    }

    async fn update(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        payload: PointPayload,
    ) -> Result<(), RagError> {
        payload.validate()?;
        let mut inner = self.inner.write();
        inner.points.remove(&id);
        inner.points.insert(id, (vector, payload));
        Ok(())
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.inner.read().points.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, EmbeddingVector, SourceRef};

    fn point(order: usize, vector: Vec<f32>) -> StoredPoint {
        let chunk = Chunk::new(
            format!("content number {order}"),
            SourceRef::new("book", "ch01", "intro"),
            order,
        );
        let embedding = EmbeddingVector {
            chunk_id: chunk.chunk_id.clone(),
            vector,
            model_name: "mock".into(),
        };
        StoredPoint::from_parts(&chunk, &embedding).unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = MemoryStore::new();
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();

        store.upsert(vec![point(0, vec![1.0, 0.0])]).await.unwrap();
        store.upsert(vec![point(0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_orders_by_descending_score() {
        let store = MemoryStore::new();
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();
        store
            .upsert(vec![
                point(0, vec![1.0, 0.0]),
                point(1, vec![0.7, 0.7]),
                point(2, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 3, None, None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
        assert_eq!(results[0].payload.chunk_order, 0);
    }

    #[tokio::test]
    async fn threshold_results_are_subset_of_unthresholded() {
        let store = MemoryStore::new();
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();
        store
            .upsert(vec![
                point(0, vec![1.0, 0.0]),
                point(1, vec![0.5, 0.8]),
                point(2, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let all = store.search(&[1.0, 0.0], 5, Some(0.0), None).await.unwrap();
        let strict = store.search(&[1.0, 0.0], 5, Some(0.9), None).await.unwrap();
        for hit in &strict {
            assert!(hit.score >= 0.9);
            assert!(all.iter().any(|candidate| candidate.id == hit.id));
        }
        assert!(strict.len() <= all.len());
    }

    #[tokio::test]
    async fn filter_restricts_to_matching_sections() {
        let store = MemoryStore::new();
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();

        let other_chunk = Chunk::new("other", SourceRef::new("book", "ch02", "traits"), 0);
        let other = StoredPoint::from_parts(
            &other_chunk,
            &EmbeddingVector {
                chunk_id: other_chunk.chunk_id.clone(),
                vector: vec![1.0, 0.0],
                model_name: "mock".into(),
            },
        )
        .unwrap();
        store
            .upsert(vec![point(0, vec![1.0, 0.0]), other])
            .await
            .unwrap();

        let filter = SearchFilter::chapter("ch02");
        let results = store
            .search(&[1.0, 0.0], 5, None, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.source_chapter, "ch02");
    }

    #[tokio::test]
    async fn recreate_clears_existing_points() {
        let store = MemoryStore::new();
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();
        store.upsert(vec![point(0, vec![1.0, 0.0])]).await.unwrap();

        // Same shape, no recreate: idempotent no-op.
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store
            .ensure_collection(2, DistanceMetric::Cosine, true)
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mismatched_shape_without_recreate_errors() {
        let store = MemoryStore::new();
        store
            .ensure_collection(2, DistanceMetric::Cosine, false)
            .await
            .unwrap();
        let err = store
            .ensure_collection(4, DistanceMetric::Cosine, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
    }
}
