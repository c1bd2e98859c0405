//! End-to-end windowing and reduction semantics: the assigner, reducer and
//! sink wired together against an in-memory index, without the queue.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use prometheus::Registry;
use tokio::sync::Mutex;

use recollect::{
    reduce_window, Conversation, Message, PipelineMetrics, SearchHit, SessionWindowAssigner,
    SessionWindowConfig, UpsertConfig, UpsertSink, VectorIndex,
};

/// Index double keyed by point id, so re-upserting the same conversation
/// overwrites instead of duplicating, like the real index.
struct InMemoryIndex {
    points: Mutex<HashMap<uuid::Uuid, Conversation>>,
}

impl InMemoryIndex {
    fn new() -> Self {
        Self {
            points: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, conversations: &[Conversation]) -> Result<()> {
        let mut points = self.points.lock().await;
        for conversation in conversations {
            points.insert(conversation.point_id(), conversation.clone());
        }
        Ok(())
    }

    async fn similarity_search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

fn message(chat_id: i64, id: i64, timestamp: i64, text: &str) -> Message {
    Message {
        chat_id,
        id,
        timestamp,
        text: text.to_string(),
        sender: "sender".to_string(),
    }
}

fn metrics() -> Arc<PipelineMetrics> {
    Arc::new(PipelineMetrics::new(&Registry::new()).unwrap())
}

/// Run a message stream through windowing and reduction, closing everything
/// at the end the way a graceful shutdown does.
fn window_and_reduce(messages: Vec<Message>) -> Vec<Conversation> {
    let mut assigner = SessionWindowAssigner::new(SessionWindowConfig::default(), metrics());
    let mut conversations = Vec::new();
    for msg in messages {
        for window in assigner.observe(msg) {
            conversations.extend(reduce_window(window));
        }
    }
    for window in assigner.flush() {
        conversations.extend(reduce_window(window));
    }
    conversations
}

#[test]
fn test_gap_splits_stream_into_two_conversations() {
    // {A@0}, {A@100}, {A@10000} with the default 7200s gap: the first two
    // merge, the third starts a new conversation.
    let conversations = window_and_reduce(vec![
        message(1, 1, 0, "a"),
        message(1, 2, 100, "b"),
        message(1, 3, 10_000, "c"),
    ]);

    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].start_timestamp, 0);
    assert_eq!(conversations[0].end_timestamp, 100);
    assert_eq!(conversations[1].start_timestamp, 10_000);
    assert_eq!(conversations[1].end_timestamp, 10_000);
}

#[test]
fn test_duplicate_enqueue_reduces_to_one_line() {
    let conversations = window_and_reduce(vec![
        message(1, 5, 10, "hi"),
        message(1, 5, 10, "hi"),
    ]);

    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].texts, "sender: hi");
}

#[test]
fn test_chats_window_independently() {
    let conversations = window_and_reduce(vec![
        message(1, 1, 0, "a"),
        message(2, 1, 50, "x"),
        message(1, 2, 100, "b"),
        message(2, 2, 120, "y"),
    ]);

    assert_eq!(conversations.len(), 2);
    let by_chat: HashMap<i64, &Conversation> =
        conversations.iter().map(|c| (c.chat_id, c)).collect();
    assert_eq!(by_chat[&1].texts, "sender: a\nsender: b");
    assert_eq!(by_chat[&2].texts, "sender: x\nsender: y");
}

#[tokio::test]
async fn test_replay_is_an_idempotent_overwrite() {
    // Process the same logical stream twice, as after a crash-and-replay
    // from the queue's audit list. The index must end up with one point per
    // logical conversation, not two.
    let index = Arc::new(InMemoryIndex::new());
    let sink = UpsertSink::new(
        index.clone(),
        UpsertConfig {
            pacing_seconds: 0,
            retry_wait_seconds: 0,
            ..UpsertConfig::default()
        },
        metrics(),
    );

    let stream = || {
        vec![
            message(1, 1, 0, "a"),
            message(1, 2, 100, "b"),
            message(1, 3, 10_000, "c"),
        ]
    };

    let first = window_and_reduce(stream());
    let replay = window_and_reduce(stream());
    assert_eq!(first, replay);

    sink.write(first).await.unwrap();
    sink.write(replay).await.unwrap();

    let points = index.points.lock().await;
    assert_eq!(points.len(), 2);
    let texts: Vec<&str> = points.values().map(|c| c.texts.as_str()).collect();
    assert!(texts.contains(&"sender: a\nsender: b"));
    assert!(texts.contains(&"sender: c"));
}

#[test]
fn test_out_of_order_delivery_is_repaired_in_texts() {
    // Slight reordering within the grace period must not change the reduced
    // conversation.
    let in_order = window_and_reduce(vec![
        message(1, 1, 10, "first"),
        message(1, 2, 20, "second"),
        message(1, 3, 30, "third"),
    ]);
    let reordered = window_and_reduce(vec![
        message(1, 1, 10, "first"),
        message(1, 3, 30, "third"),
        message(1, 2, 20, "second"),
    ]);

    assert_eq!(in_order, reordered);
    assert_eq!(
        in_order[0].texts,
        "sender: first\nsender: second\nsender: third"
    );
}
