use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::embedding::EmbeddingService;
use crate::pipeline::models::Conversation;

/// Similarity metric used by the collection. A tuning knob, not semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            "euclid" | "euclidean" => Ok(Self::Euclid),
            other => anyhow::bail!("Unknown distance metric: {other}"),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
        }
    }
}

/// One similarity search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub texts: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// The pipeline's only view of the vector index: idempotent batch upsert
/// plus the similarity search consumed by retrieval features elsewhere.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, conversations: &[Conversation]) -> Result<()>;

    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    async fn health_check(&self) -> Result<()>;
}

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    distance: Distance,
    embedder: Arc<dyn EmbeddingService>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: serde_json::Value,
}

impl QdrantIndex {
    pub fn new(
        base_url: String,
        collection: String,
        distance: Distance,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            distance,
            embedder,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Create the collection if it does not exist yet. Vector size follows
    /// the configured embedding model.
    pub async fn ensure_collection(&self) -> Result<()> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .context("Failed to reach the vector index")?;

        if response.status().is_success() {
            debug!(collection = %self.collection, "Collection already exists");
            return Ok(());
        }

        if response.status().as_u16() != 404 {
            anyhow::bail!(
                "Vector index returned unexpected status {} for collection lookup",
                response.status()
            );
        }

        let body = json!({
            "vectors": {
                "size": self.embedder.dimension(),
                "distance": self.distance.as_str(),
            }
        });

        let response = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .context("Failed to create collection")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Collection creation failed with status {status}: {error_text}");
        }

        info!(
            collection = %self.collection,
            distance = self.distance.as_str(),
            "Created vector index collection"
        );
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, conversations: &[Conversation]) -> Result<()> {
        if conversations.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = conversations.iter().map(|c| c.texts.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed conversation batch")?;

        let points: Vec<serde_json::Value> = conversations
            .iter()
            .zip(vectors)
            .map(|(conversation, vector)| {
                json!({
                    "id": conversation.point_id().to_string(),
                    "vector": vector,
                    "payload": conversation,
                })
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .context("Failed to send upsert request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Upsert failed with status {status}: {error_text}");
        }

        debug!(
            collection = %self.collection,
            points = conversations.len(),
            "Upserted conversation batch"
        );
        Ok(())
    }

    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed search query")?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await
            .context("Failed to send search request")?;

        if !response.status().is_success() {
            anyhow::bail!("Search failed with status {}", response.status());
        }

        let search_response: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search response")?;

        Ok(search_response
            .result
            .into_iter()
            .map(|point| SearchHit {
                texts: point
                    .payload
                    .get("texts")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/collections", self.base_url))
            .send()
            .await
            .context("Failed to reach the vector index")?;

        if !response.status().is_success() {
            anyhow::bail!("Vector index returned status {}", response.status());
        }
        Ok(())
    }
}
