use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::error::Result;
use super::metrics::PipelineMetrics;
use super::models::Message;
use crate::queue::MessageQueue;

/// Live message source: drains the durable queue on demand and yields
/// validated, normalized messages. Never blocks on an empty queue; the
/// caller decides the next wake time.
pub struct QueueSource {
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<PipelineMetrics>,
}

impl QueueSource {
    pub fn new(queue: Arc<dyn MessageQueue>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { queue, metrics }
    }

    pub async fn poll(&self) -> Result<Vec<Message>> {
        let raw = self.queue.drain_all().await?;
        Ok(self.sanitize(raw))
    }

    fn sanitize(&self, raw: Vec<Message>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(raw.len());
        for message in raw {
            match message.validate() {
                Ok(()) => messages.push(message.normalized()),
                Err(e) => {
                    debug!("Dropping invalid message: {}", e);
                    self.metrics.messages_invalid.inc();
                }
            }
        }
        self.metrics.messages_ingested.inc_by(messages.len() as f64);
        messages
    }
}

/// Historical export source: parses one per-chat archive file into the same
/// canonical messages a live producer would enqueue. One-shot.
pub struct ArchiveSource {
    chat_id: i64,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ChatExport {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExportRecord {
    #[serde(rename = "type", default)]
    kind: String,
    id: i64,
    date_unixtime: UnixTime,
    from: String,
    #[serde(default)]
    text: TextField,
}

/// Exports carry the epoch either as a number or as a decimal string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnixTime {
    Int(i64),
    Str(String),
}

impl UnixTime {
    fn as_secs(&self) -> Option<i64> {
        match self {
            Self::Int(secs) => Some(*secs),
            Self::Str(raw) => raw.parse().ok(),
        }
    }
}

/// Message text is either a plain string or a list of plain strings and
/// typed entities.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextField {
    Plain(String),
    Rich(Vec<TextPart>),
}

impl Default for TextField {
    fn default() -> Self {
        Self::Plain(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextPart {
    Plain(String),
    Entity(TextEntity),
}

#[derive(Debug, Deserialize)]
struct TextEntity {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

impl TextField {
    /// Join rich text parts into one string. A `bot_command` entity voids
    /// the whole message.
    fn flatten(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Rich(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match part {
                        TextPart::Plain(text) => joined.push_str(text),
                        TextPart::Entity(entity) => {
                            if entity.kind == "bot_command" {
                                return String::new();
                            }
                            joined.push_str(&entity.text);
                        }
                    }
                }
                joined
            }
        }
    }
}

impl ArchiveSource {
    pub fn new(chat_id: i64, path: PathBuf) -> Self {
        Self { chat_id, path }
    }

    pub fn read_all(&self) -> Result<Vec<Message>> {
        let file = File::open(&self.path)?;
        let export: ChatExport = serde_json::from_reader(BufReader::new(file))?;

        let mut messages = Vec::new();
        let mut dropped = 0usize;
        for value in export.messages {
            let record: ExportRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(_) => {
                    dropped += 1;
                    continue;
                }
            };
            if record.kind != "message" {
                continue;
            }
            let text = record.text.flatten();
            if text.is_empty() {
                dropped += 1;
                continue;
            }
            let Some(timestamp) = record.date_unixtime.as_secs() else {
                dropped += 1;
                continue;
            };

            let message = Message {
                chat_id: self.chat_id,
                id: record.id,
                timestamp,
                text,
                sender: record.from,
            };
            messages.push(message.normalized());
        }

        if dropped > 0 {
            warn!(
                path = %self.path.display(),
                dropped,
                "Dropped archive records failing validation"
            );
        }
        debug!(
            path = %self.path.display(),
            count = messages.len(),
            "Parsed chat export"
        );
        Ok(messages)
    }
}
