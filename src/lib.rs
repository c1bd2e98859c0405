pub mod config;
pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod queue;

pub use config::{Config, EmbeddingConfig};
pub use embedding::{EmbeddingHealth, EmbeddingProvider, EmbeddingService, SimpleEmbedder};
pub use index::{Distance, QdrantIndex, SearchHit, VectorIndex};
pub use queue::{MessageQueue, RedisMessageQueue};

// Re-export pipeline types for convenience
pub use pipeline::{
    pack_batches, reduce_window, ArchiveSource, Conversation, Message, Pipeline, PipelineError,
    PipelineMetrics, QueueSource, SessionWindow, SessionWindowAssigner, SessionWindowConfig,
    UpsertConfig, UpsertSink,
};
