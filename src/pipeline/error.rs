use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upsert batch failed after {attempts} attempts: {reason}")]
    UpsertExhausted { attempts: u32, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
