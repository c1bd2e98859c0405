use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{PipelineError, Result};

/// One chat utterance as delivered by a producer.
///
/// `(chat_id, id)` is the logical identity of a message; the same message may
/// be delivered more than once and duplicates are removed during reduction.
/// On the wire the sender field is named `from`; unknown extra fields are
/// tolerated on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub chat_id: i64,
    pub id: i64,
    pub timestamp: i64,
    pub text: String,
    #[serde(rename = "from")]
    pub sender: String,
}

impl Message {
    /// Logical identity within the at-least-once delivery stream.
    pub fn key(&self) -> (i64, i64) {
        (self.chat_id, self.id)
    }

    /// Group chats on some platforms carry negative ids; the pipeline keys
    /// everything by the positive form.
    pub fn normalized(mut self) -> Self {
        self.chat_id = self.chat_id.saturating_abs();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.is_empty() {
            return Err(PipelineError::Validation(format!(
                "empty text in message {} of chat {}",
                self.id, self.chat_id
            )));
        }
        Ok(())
    }
}

/// The aggregate of all messages in one closed session window for one chat.
///
/// Immutable once created; its terminal state is an idempotent upsert into
/// the vector index under `point_id()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub chat_id: i64,
    pub conversation_id: i64,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub texts: String,
}

impl Conversation {
    /// Deterministic index identity. Re-processing the same logical window
    /// always yields the same id, so replays overwrite instead of duplicating.
    pub fn point_id(&self) -> Uuid {
        let digest = md5::compute(format!("{}-{}", self.chat_id, self.conversation_id));
        Uuid::from_bytes(digest.0)
    }
}
