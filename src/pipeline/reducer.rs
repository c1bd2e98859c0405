use std::collections::HashSet;

use tracing::debug;

use super::models::Conversation;
use super::window::SessionWindow;

/// Fold one closed session window into its canonical conversation record.
///
/// Messages are deduplicated by `(chat_id, id)` (at-least-once delivery may
/// hand the same message to a window twice), ordered by event time, and
/// rendered as newline-joined `"{sender}: {text}"` lines. A window with no
/// surviving messages reduces to nothing.
pub fn reduce_window(window: SessionWindow) -> Option<Conversation> {
    let mut seen = HashSet::new();
    let mut messages: Vec<_> = window
        .messages
        .into_iter()
        .filter(|m| seen.insert(m.key()))
        .collect();

    if messages.is_empty() {
        debug!(chat_id = window.chat_id, "Window closed with no surviving messages");
        return None;
    }

    messages.sort_by_key(|m| (m.timestamp, m.id));

    let start_timestamp = messages.first().map(|m| m.timestamp)?;
    let end_timestamp = messages.last().map(|m| m.timestamp)?;
    let texts = messages
        .iter()
        .map(|m| format!("{}: {}", m.sender, m.text))
        .collect::<Vec<_>>()
        .join("\n");

    Some(Conversation {
        chat_id: window.chat_id,
        conversation_id: start_timestamp,
        start_timestamp,
        end_timestamp,
        texts,
    })
}
