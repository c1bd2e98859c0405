use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::pipeline::error::Result;
use crate::pipeline::models::Message;

/// Write-ahead buffer between producers (chat adapters, importers) and the
/// windowing engine.
///
/// A thin, non-retrying primitive: callers wrap `enqueue`/`drain_all` in
/// their own retry policy. At-least-once delivery ends at `drain_all`; a
/// crash between a drain and full downstream processing loses those messages
/// from the pipeline's perspective, which the idempotent upsert downstream
/// compensates for.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a batch of messages to the queue in one pipelined round trip.
    async fn enqueue(&self, messages: &[Message]) -> Result<()>;

    /// Return and remove everything currently queued. Never blocks waiting
    /// for new data; an empty queue yields an empty batch.
    async fn drain_all(&self) -> Result<Vec<Message>>;

    async fn queued_len(&self) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

/// Redis-list implementation. Each entry is one JSON-serialized message;
/// drained entries are moved to a `{key}-cumulative` list for forensic
/// replay instead of being deleted outright.
pub struct RedisMessageQueue {
    conn: redis::aio::ConnectionManager,
    key: String,
    write_batch_size: usize,
}

impl RedisMessageQueue {
    pub async fn connect(redis_url: &str, key: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            key: key.to_string(),
            write_batch_size: 100,
        })
    }

    pub fn processed_key(&self) -> String {
        format!("{}-cumulative", self.key)
    }
}

#[async_trait]
impl MessageQueue for RedisMessageQueue {
    async fn enqueue(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            entries.push(serde_json::to_string(message)?);
        }

        let mut pipe = redis::pipe();
        for chunk in entries.chunks(self.write_batch_size) {
            pipe.rpush(&self.key, chunk);
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(count = messages.len(), key = %self.key, "Enqueued messages");
        Ok(())
    }

    async fn drain_all(&self) -> Result<Vec<Message>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(&self.key, 0, -1).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        // Move the raw entries to the audit list and clear the queue in a
        // single transactional round trip.
        let processed_key = self.processed_key();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for chunk in entries.chunks(self.write_batch_size) {
            pipe.rpush(&processed_key, chunk);
        }
        pipe.del(&self.key);
        let _: () = pipe.query_async(&mut conn).await?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::from_str::<Message>(entry) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Dropping undecodable queue entry: {}", e),
            }
        }

        debug!(count = messages.len(), key = %self.key, "Drained queue");
        Ok(messages)
    }

    async fn queued_len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(&self.key).await?;
        Ok(len)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64) -> Message {
        Message {
            chat_id: 1,
            id,
            timestamp: 100 + id,
            text: format!("msg {id}"),
            sender: "ann".to_string(),
        }
    }

    async fn test_queue() -> RedisMessageQueue {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL not set");
        let key = format!("recollect-test-{}", uuid::Uuid::new_v4());
        RedisMessageQueue::connect(&url, &key)
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_enqueue_then_drain_round_trip() {
        let queue = test_queue().await;

        queue.enqueue(&[message(1), message(2)]).await.unwrap();
        assert_eq!(queue.queued_len().await.unwrap(), 2);

        let drained = queue.drain_all().await.unwrap();
        assert_eq!(drained, vec![message(1), message(2)]);

        // The queue is empty afterwards and a second drain yields nothing.
        assert_eq!(queue.queued_len().await.unwrap(), 0);
        assert!(queue.drain_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_drain_moves_entries_to_processed_list() {
        let queue = test_queue().await;

        queue.enqueue(&[message(1)]).await.unwrap();
        queue.drain_all().await.unwrap();

        let mut conn = queue.conn.clone();
        let audit: Vec<String> = conn
            .lrange(queue.processed_key(), 0, -1)
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
    }
}
