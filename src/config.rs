use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::index::Distance;
use crate::pipeline::sink::UpsertConfig;
use crate::pipeline::window::SessionWindowConfig;

/// Immutable process configuration, constructed once at startup and passed
/// down into each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Redis connection URL for the durable message queue
    pub redis_url: String,

    /// Qdrant base URL for the conversation vector index
    pub qdrant_url: String,

    /// Redis list key producers enqueue into
    pub message_queue_key: String,

    /// Vector index collection holding conversation records
    pub collection_name: String,

    /// Similarity metric for the collection (cosine, dot or euclid)
    pub distance_metric: String,

    /// How often the live pipeline drains the queue
    pub queue_poll_interval_seconds: u64,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Session windowing parameters
    pub windowing: SessionWindowConfig,

    /// Upsert batching and pacing parameters
    pub upsert: UpsertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider (openai, ollama or mock)
    pub provider: String,

    /// Model name to use for embeddings
    pub model: String,

    /// API key (for OpenAI, empty for Ollama)
    pub api_key: String,

    /// Base URL for the embedding service
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            qdrant_url: "http://127.0.0.1:6333".to_string(),
            message_queue_key: "message".to_string(),
            collection_name: "conversation".to_string(),
            distance_metric: "cosine".to_string(),
            queue_poll_interval_seconds: 5,
            embedding: EmbeddingConfig::default(),
            windowing: SessionWindowConfig::default(),
            upsert: UpsertConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: String::new(),
            base_url: "http://127.0.0.1:11434".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Config::default();

        if let Ok(url) = env::var("REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(url) = env::var("QDRANT_URL") {
            config.qdrant_url = url;
        }
        if let Ok(key) = env::var("MESSAGE_QUEUE_KEY") {
            config.message_queue_key = key;
        }
        if let Ok(name) = env::var("CONVERSATION_COLLECTION") {
            config.collection_name = name;
        }
        if let Ok(metric) = env::var("DISTANCE_METRIC") {
            config.distance_metric = metric;
        }
        if let Ok(interval) = env::var("QUEUE_POLL_INTERVAL_SECONDS") {
            config.queue_poll_interval_seconds = interval
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid QUEUE_POLL_INTERVAL_SECONDS: {}", e))?;
        }

        if let Ok(gap) = env::var("SESSION_GAP_SECONDS") {
            config.windowing.session_gap_seconds = gap
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid SESSION_GAP_SECONDS: {}", e))?;
        }
        if let Ok(grace) = env::var("LATE_ARRIVAL_GRACE_SECONDS") {
            config.windowing.late_arrival_grace_seconds = grace
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid LATE_ARRIVAL_GRACE_SECONDS: {}", e))?;
        }

        if let Ok(size) = env::var("UPSERT_BATCH_SIZE") {
            config.upsert.target_batch_size = size
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid UPSERT_BATCH_SIZE: {}", e))?;
        }
        if let Ok(pacing) = env::var("UPSERT_PACING_SECONDS") {
            config.upsert.pacing_seconds = pacing
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid UPSERT_PACING_SECONDS: {}", e))?;
        }
        if let Ok(attempts) = env::var("UPSERT_MAX_ATTEMPTS") {
            config.upsert.max_attempts = attempts
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid UPSERT_MAX_ATTEMPTS: {}", e))?;
        }
        if let Ok(wait) = env::var("UPSERT_RETRY_WAIT_SECONDS") {
            config.upsert.retry_wait_seconds = wait
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid UPSERT_RETRY_WAIT_SECONDS: {}", e))?;
        }

        if let Ok(provider) = env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(base_url) = env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = base_url;
        }
        // API key is optional (not needed for Ollama)
        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            config.embedding.api_key = api_key;
        }

        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with. Called once at
    /// startup; failures here abort the process.
    pub fn validate(&self) -> Result<()> {
        if self.windowing.session_gap_seconds <= 0 {
            anyhow::bail!("SESSION_GAP_SECONDS must be positive");
        }
        if self.windowing.late_arrival_grace_seconds < 0 {
            anyhow::bail!("LATE_ARRIVAL_GRACE_SECONDS must not be negative");
        }
        if self.upsert.target_batch_size == 0 {
            anyhow::bail!("UPSERT_BATCH_SIZE must be at least 1");
        }
        if self.upsert.max_attempts == 0 {
            anyhow::bail!("UPSERT_MAX_ATTEMPTS must be at least 1");
        }
        if self.queue_poll_interval_seconds == 0 {
            anyhow::bail!("QUEUE_POLL_INTERVAL_SECONDS must be at least 1");
        }
        Distance::parse(&self.distance_metric)?;
        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "mock" => {}
            other => anyhow::bail!("Unknown embedding provider: {other}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.windowing.session_gap_seconds, 7200);
        assert_eq!(config.windowing.late_arrival_grace_seconds, 30);
        assert_eq!(config.queue_poll_interval_seconds, 5);
        assert_eq!(config.upsert.pacing_seconds, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.windowing.session_gap_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upsert.target_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.distance_metric = "manhattan".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.provider = "huggingface".to_string();
        assert!(config.validate().is_err());
    }
}
