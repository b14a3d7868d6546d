//! Qdrant-backed [`VectorStore`] over the REST API.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::retry::{RetryPolicy, classify_rag_error, retryable_status};
use crate::types::{PointPayload, RagError, RetrievalResult, StoredPoint};

use super::{DistanceMetric, SearchFilter, UpsertReport, VectorStore, validate_and_batch};

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<usize>,
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    payload: PointPayload,
}

/// REST client for one Qdrant collection.
///
/// Every batch write and every search runs through the configured
/// [`RetryPolicy`]; transient statuses (429/502/503/504) and transport
/// failures are retried, anything else is surfaced as
/// [`RagError::Storage`].
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    batch_size: usize,
    policy: RetryPolicy,
    /// Dimensionality learned from `ensure_collection`, used to reject
    /// mismatched vectors before they reach the wire.
    known_dims: Mutex<Option<usize>>,
}

impl QdrantStore {
    pub fn new(config: &StoreConfig) -> Result<Self, RagError> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| RagError::Config("QDRANT_URL is required".into()))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            batch_size: config.upsert_batch_size.max(1),
            policy: config.retry_policy(),
            known_dims: Mutex::new(None),
        })
    }

    /// Override the retry schedule (tests use fast policies).
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    /// Send one request, mapping transport errors and retryable statuses to
    /// [`RagError::Transient`] so the policy can classify them.
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, RagError> {
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                RagError::Transient {
                    endpoint: self.base_url.clone(),
                    reason: err.to_string(),
                }
            } else {
                RagError::Http(err)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if retryable_status(status) {
            Err(RagError::Transient {
                endpoint: self.base_url.clone(),
                reason: format!("status {status}: {body}"),
            })
        } else {
            Err(RagError::Storage(format!(
                "qdrant returned {status}: {body}"
            )))
        }
    }

    async fn get_collection(&self) -> Result<Option<CollectionInfo>, RagError> {
        let builder = self.request(Method::GET, &format!("/collections/{}", self.collection));
        let response = builder.send().await.map_err(RagError::Http)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let envelope: ApiEnvelope<CollectionInfo> = response.json().await?;
                Ok(Some(envelope.result))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RagError::Storage(format!(
                    "qdrant returned {status}: {body}"
                )))
            }
        }
    }

    async fn create_collection(
        &self,
        dimensions: usize,
        distance: DistanceMetric,
    ) -> Result<(), RagError> {
        let body = json!({
            "vectors": { "size": dimensions, "distance": distance.as_str() }
        });
        self.policy
            .run(
                || {
                    let builder = self
                        .request(Method::PUT, &format!("/collections/{}", self.collection))
                        .json(&body);
                    self.send(builder)
                },
                classify_rag_error,
            )
            .await?;
        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), RagError> {
        let builder = self.request(Method::DELETE, &format!("/collections/{}", self.collection));
        self.send(builder).await?;
        Ok(())
    }

    async fn upsert_batch(&self, batch: &[StoredPoint]) -> Result<(), RagError> {
        let points: Vec<serde_json::Value> = batch
            .iter()
            .map(|point| {
                json!({
                    "id": point.point_id,
                    "vector": point.vector,
                    "payload": point.payload,
                })
            })
            .collect();
        let body = json!({ "points": points });

        self.policy
            .run(
                || {
                    let builder = self
                        .request(
                            Method::PUT,
                            &format!("/collections/{}/points?wait=true", self.collection),
                        )
                        .json(&body);
                    self.send(builder)
                },
                classify_rag_error,
            )
            .await?;
        Ok(())
    }

    fn filter_json(filter: &SearchFilter) -> serde_json::Value {
        let mut must = Vec::new();
        if let Some(chapter) = &filter.chapter {
            must.push(json!({ "key": "source_chapter", "match": { "value": chapter } }));
        }
        if let Some(section) = &filter.section {
            must.push(json!({ "key": "source_section", "match": { "value": section } }));
        }
        json!({ "must": must })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: DistanceMetric,
        recreate: bool,
    ) -> Result<(), RagError> {
        let existing = self.get_collection().await?;

        match existing {
            Some(info) if !recreate => {
                let params = &info.config.params.vectors;
                if params.size != dimensions || params.distance != distance.as_str() {
                    return Err(RagError::Storage(format!(
                        "collection '{}' exists with {} dims / {} distance, wanted {} / {}",
                        self.collection,
                        params.size,
                        params.distance,
                        dimensions,
                        distance.as_str()
                    )));
                }
                tracing::info!(collection = %self.collection, "collection already exists");
            }
            Some(_) => {
                tracing::info!(collection = %self.collection, "recreating collection");
                self.delete_collection().await?;
                self.create_collection(dimensions, distance).await?;
            }
            None => {
                tracing::info!(
                    collection = %self.collection,
                    dimensions,
                    distance = distance.as_str(),
                    "creating collection"
                );
                self.create_collection(dimensions, distance).await?;
            }
        }

        *self.known_dims.lock() = Some(dimensions);
        Ok(())
    }

    async fn upsert(&self, points: Vec<StoredPoint>) -> Result<UpsertReport, RagError> {
        let total = points.len();
        let expected_dims = *self.known_dims.lock();
        let (batches, rejected) = validate_and_batch(points, expected_dims, self.batch_size);

        let mut report = UpsertReport {
            rejected,
            ..UpsertReport::default()
        };

        for (index, batch) in batches.iter().enumerate() {
            match self.upsert_batch(batch).await {
                Ok(()) => report.stored_count += batch.len(),
                Err(err) => {
                    tracing::warn!(
                        batch = index,
                        points = batch.len(),
                        error = %err,
                        "upsert batch failed after retries"
                    );
                    report.failed_batches += 1;
                }
            }
        }

        tracing::info!(
            stored = report.stored_count,
            failed_batches = report.failed_batches,
            rejected = report.rejected.len(),
            total,
            "upsert finished"
        );
        Ok(report)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let mut body = json!({
            "vector": query_vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = Self::filter_json(filter);
        }

        let response = self
            .policy
            .run(
                || {
                    let builder = self
                        .request(
                            Method::POST,
                            &format!("/collections/{}/points/search", self.collection),
                        )
                        .json(&body);
                    self.send(builder)
                },
                classify_rag_error,
            )
            .await?;

        let envelope: ApiEnvelope<Vec<ScoredPoint>> = response.json().await?;
        let mut results: Vec<RetrievalResult> = envelope
            .result
            .into_iter()
            .map(|point| RetrievalResult {
                id: match point.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                score: point.score,
                payload: point.payload,
            })
            .collect();
        // The server already orders by score; keep the contract locally too.
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), RagError> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids });
        self.policy
            .run(
                || {
                    let builder = self
                        .request(
                            Method::POST,
                            &format!("/collections/{}/points/delete?wait=true", self.collection),
                        )
                        .json(&body);
                    self.send(builder)
                },
                classify_rag_error,
            )
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        payload: PointPayload,
    ) -> Result<(), RagError> {
        payload.validate()?;
        // Delete-then-insert; a reader between the two calls sees neither
        // version.
        self.delete(&[id]).await?;
        let point = StoredPoint {
            point_id: id,
            vector,
            payload,
        };
        self.upsert_batch(std::slice::from_ref(&point)).await
    }

    async fn count(&self) -> Result<usize, RagError> {
        let info = self
            .get_collection()
            .await?
            .ok_or_else(|| RagError::Storage(format!("collection '{}' not found", self.collection)))?;
        Ok(info.points_count.unwrap_or(0))
    }
}
