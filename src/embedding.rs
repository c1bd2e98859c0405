use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

/// Narrow seam between the pipeline and whatever model turns text into
/// vectors. The index only ever sees this trait.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch sequentially, pacing requests so a burst of closed
    /// windows does not trip the provider's rate limit.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingProvider {
    OpenAI,
    Ollama,
    Mock, // For testing
}

#[derive(Debug, Clone)]
pub struct SimpleEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: EmbeddingProvider,
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    input: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

// Ollama API request/response structures
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl SimpleEmbedder {
    pub fn new_openai(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model,
            base_url: "https://api.openai.com".to_string(),
            provider: EmbeddingProvider::OpenAI,
        }
    }

    pub fn new_ollama(base_url: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60)) // Ollama might be slower
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key: String::new(),
            model,
            base_url,
            provider: EmbeddingProvider::Ollama,
        }
    }

    pub fn new_mock() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key: String::new(),
            model: "mock-model".to_string(),
            base_url: String::new(),
            provider: EmbeddingProvider::Mock,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let embedder = match config.provider.as_str() {
            "openai" => Self::new_openai(config.api_key.clone(), config.model.clone()),
            "ollama" => Self::new_ollama(config.base_url.clone(), config.model.clone()),
            "mock" => Self::new_mock(),
            other => anyhow::bail!("Unknown embedding provider: {other}"),
        };
        Ok(embedder)
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        match self.provider {
            EmbeddingProvider::OpenAI => self.embed_openai(text).await,
            EmbeddingProvider::Ollama => self.embed_ollama(text).await,
            EmbeddingProvider::Mock => Ok(self.embed_mock(text)),
        }
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>> {
        let request = OpenAiEmbeddingRequest {
            input: text.to_string(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if status.as_u16() == 429 {
                warn!("Rate limited by OpenAI API, will retry");
                return Err(anyhow::anyhow!("Rate limited: {}", error_text));
            }

            return Err(anyhow::anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let embedding_response: OpenAiEmbeddingResponse = response.json().await?;

        embedding_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("No embedding data in OpenAI response"))
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if status.as_u16() == 429 {
                warn!("Rate limited by Ollama API, will retry");
                return Err(anyhow::anyhow!("Rate limited: {}", error_text));
            }

            return Err(anyhow::anyhow!(
                "Ollama API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let embedding_response: OllamaEmbeddingResponse = response.json().await?;
        Ok(embedding_response.embedding)
    }

    /// Deterministic embedding derived from the text content alone, so tests
    /// never need a live embedding service.
    fn embed_mock(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let dimensions = self.dimension();
        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let value = ((seed >> 16) % 1000) as f32 / 1000.0 - 0.5;
            embedding.push(value);
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }

        embedding
    }

    /// Probe the provider with a tiny request.
    pub async fn health_check(&self) -> EmbeddingHealth {
        let start_time = std::time::Instant::now();
        let result = self.embed("health check").await;
        let response_time = start_time.elapsed();

        EmbeddingHealth {
            healthy: result.is_ok(),
            model: self.model.clone(),
            provider: format!("{:?}", self.provider),
            response_time_ms: response_time.as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingService for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text of length: {}", text.len());

        let operation = || async {
            match self.embed_internal(text).await {
                Ok(embedding) => Ok(embedding),
                Err(e) => {
                    if e.to_string().contains("Rate limited") {
                        Err(backoff::Error::transient(e))
                    } else {
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        };

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        retry(backoff, operation)
            .await
            .context("Embedding request failed")
    }

    fn dimension(&self) -> usize {
        match self.provider {
            EmbeddingProvider::OpenAI => match self.model.as_str() {
                "text-embedding-3-large" => 3072,
                _ => 1536,
            },
            EmbeddingProvider::Ollama => match self.model.as_str() {
                "mxbai-embed-large" => 1024,
                "all-minilm" => 384,
                _ => 768,
            },
            EmbeddingProvider::Mock => 768,
        }
    }
}

/// Health status of the embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingHealth {
    pub healthy: bool,
    pub model: String,
    pub provider: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_is_deterministic() {
        let embedder = SimpleEmbedder::new_mock();

        let first = embedder.embed("hello world").await.unwrap();
        let second = embedder.embed("hello world").await.unwrap();
        let other = embedder.embed("something else").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 768);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_length() {
        let embedder = SimpleEmbedder::new_mock();
        let embedding = embedder.embed("normalize me").await.unwrap();

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_embedding_dimensions() {
        let embedder =
            SimpleEmbedder::new_openai("dummy".to_string(), "text-embedding-3-small".to_string());
        assert_eq!(embedder.dimension(), 1536);

        let embedder = SimpleEmbedder::new_ollama(
            "http://localhost:11434".to_string(),
            "nomic-embed-text".to_string(),
        );
        assert_eq!(embedder.dimension(), 768);

        let embedder = SimpleEmbedder::new_ollama(
            "http://localhost:11434".to_string(),
            "all-minilm".to_string(),
        );
        assert_eq!(embedder.dimension(), 384);
    }

    #[test]
    fn test_provider_types() {
        let config = EmbeddingConfig {
            provider: "mock".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = SimpleEmbedder::from_config(&config).unwrap();
        assert_eq!(embedder.provider(), &EmbeddingProvider::Mock);

        let config = EmbeddingConfig {
            provider: "sentencepiece".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(SimpleEmbedder::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let embedder = SimpleEmbedder::new_mock();
        let texts = vec!["a".to_string(), "b".to_string()];

        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("a").await.unwrap());
        assert_eq!(batch[1], embedder.embed("b").await.unwrap());
    }
}
