pub mod error;
pub mod metrics;
pub mod models;
pub mod reducer;
pub mod retry;
pub mod runner;
pub mod sink;
pub mod source;
pub mod window;

pub use error::PipelineError;
pub use metrics::PipelineMetrics;
pub use models::{Conversation, Message};
pub use reducer::reduce_window;
pub use runner::Pipeline;
pub use sink::{pack_batches, UpsertConfig, UpsertSink};
pub use source::{ArchiveSource, QueueSource};
pub use window::{SessionWindow, SessionWindowAssigner, SessionWindowConfig};
