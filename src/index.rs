//! Vector index abstraction for nearest-neighbor retrieval.
//!
//! The [`VectorIndex`] trait defines the two operations the pipeline needs
//! from a vector database — `search` and `upsert` — enabling pluggable
//! backends. Two implementations are provided:
//!
//! - **[`QdrantIndex`]** — the production backend, speaking Qdrant's HTTP
//!   API via `reqwest`. The index's internal search algorithm is opaque to
//!   this crate; we only rely on results being ranked by descending
//!   similarity.
//! - **[`InMemoryIndex`]** — brute-force cosine similarity over vectors held
//!   in memory, for tests and local experiments.
//!
//! The index is assumed eventually consistent: a `search` immediately after
//! `upsert` is not guaranteed to see the new points.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::embedding::cosine_similarity;
use crate::models::{ChunkMetadata, RetrievedChunk};

/// A chunk prepared for indexing: id, embedding, and payload.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPoint {
    /// Point id. Qdrant requires a UUID (or integer) here.
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Abstract nearest-neighbor index.
///
/// Implementations must be `Send + Sync`; one instance is shared read-mostly
/// across concurrent query tasks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` points ranked by descending similarity to `vector`.
    ///
    /// An index holding fewer than `k` points returns all of them; this is
    /// never an error. Tie order follows the backend's own ordering.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>>;

    /// Insert or replace points.
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()>;
}

// ============ Qdrant backend ============

/// Qdrant HTTP API client.
///
/// Reads the optional `QDRANT_API_KEY` environment variable for deployments
/// with authentication enabled.
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct QdrantSearchResponse {
    #[serde(default)]
    result: Vec<QdrantScoredPoint>,
}

#[derive(Deserialize)]
struct QdrantScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: QdrantPayload,
}

#[derive(Deserialize, Default)]
struct QdrantPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: ChunkMetadata,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    /// Create the collection if it does not exist (cosine distance).
    /// Idempotent: an existing collection is left untouched.
    pub async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let status = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await?
            .status();

        if status.is_success() {
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });

        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant create collection failed {}: {}", status, text);
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant search failed {}: {}", status, text);
        }

        let parsed: QdrantSearchResponse = resp.json().await?;

        // Qdrant returns points ranked by descending score; keep its order.
        let chunks = parsed
            .result
            .into_iter()
            .map(|p| RetrievedChunk {
                id: match p.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                content: p.payload.content,
                score: Some(p.score),
                metadata: p.payload.metadata,
            })
            .collect();

        Ok(chunks)
    }

    async fn upsert(&self, points: &[IndexPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "points": points
                .iter()
                .map(|p| serde_json::json!({
                    "id": &p.id,
                    "vector": &p.vector,
                    "payload": {
                        "content": &p.content,
                        "metadata": &p.metadata,
                    },
                }))
                .collect::<Vec<_>>(),
        });

        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant upsert failed {}: {}", status, text);
        }

        Ok(())
    }
}

// ============ In-memory backend ============

struct StoredPoint {
    id: String,
    vector: Vec<f32>,
    content: String,
    metadata: ChunkMetadata,
}

/// In-memory index for tests and local experiments.
///
/// Search is brute-force cosine similarity over all stored vectors,
/// sorted descending. Fast enough for corpora of a few thousand chunks.
pub struct InMemoryIndex {
    points: RwLock<Vec<StoredPoint>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let points = self.points.read().unwrap();

        let mut scored: Vec<RetrievedChunk> = points
            .iter()
            .map(|p| RetrievedChunk {
                id: p.id.clone(),
                content: p.content.clone(),
                score: Some(cosine_similarity(vector, &p.vector)),
                metadata: p.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn upsert(&self, new_points: &[IndexPoint]) -> Result<()> {
        let mut points = self.points.write().unwrap();

        for np in new_points {
            if let Some(existing) = points.iter_mut().find(|p| p.id == np.id) {
                existing.vector = np.vector.clone();
                existing.content = np.content.clone();
                existing.metadata = np.metadata.clone();
            } else {
                points.push(StoredPoint {
                    id: np.id.clone(),
                    vector: np.vector.clone(),
                    content: np.content.clone(),
                    metadata: np.metadata.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>, content: &str) -> IndexPoint {
        IndexPoint {
            id: id.to_string(),
            vector,
            content: content.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                point("a", vec![1.0, 0.0], "aligned"),
                point("b", vec![0.0, 1.0], "orthogonal"),
                point("c", vec![0.7, 0.7], "diagonal"),
            ])
            .await
            .unwrap();

        let results = index.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
        assert_eq!(results[2].id, "b");
    }

    #[tokio::test]
    async fn test_search_fewer_points_than_k() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[point("a", vec![1.0, 0.0], "only one")])
            .await
            .unwrap();

        let results = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let index = InMemoryIndex::new();
        let results = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[point("a", vec![1.0, 0.0], "before")])
            .await
            .unwrap();
        index
            .upsert(&[point("a", vec![0.0, 1.0], "after")])
            .await
            .unwrap();

        assert_eq!(index.len(), 1);
        let results = index.search(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(results[0].content, "after");
    }

    #[test]
    fn test_parse_qdrant_search_response() {
        let json = r#"{
            "result": [
                {
                    "id": "0e4e7c3a-0000-0000-0000-000000000001",
                    "score": 0.91,
                    "payload": {
                        "content": "Photosynthesis converts light energy.",
                        "metadata": { "source": "Biology", "section": "Ch. 4", "page_number": 88 }
                    }
                }
            ]
        }"#;

        let parsed: QdrantSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.result.len(), 1);
        assert_eq!(parsed.result[0].score, 0.91);
        assert_eq!(
            parsed.result[0].payload.metadata.source.as_deref(),
            Some("Biology")
        );
    }
}
