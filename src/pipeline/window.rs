use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::metrics::PipelineMetrics;
use super::models::Message;

/// Event-time session windowing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindowConfig {
    /// Inactivity gap separating two sessions in the same chat, in seconds.
    /// Messages at most this far apart belong to the same session.
    pub session_gap_seconds: i64,

    /// How far behind a chat's watermark a message may arrive and still be
    /// admitted. Anything later is dropped.
    pub late_arrival_grace_seconds: i64,
}

impl Default for SessionWindowConfig {
    fn default() -> Self {
        Self {
            session_gap_seconds: 7200,
            late_arrival_grace_seconds: 30,
        }
    }
}

/// Per-chat accumulator for one conversation session.
///
/// Owned exclusively by the assigner while open; handed off read-only to the
/// reducer once closed.
#[derive(Debug, Clone)]
pub struct SessionWindow {
    pub chat_id: i64,
    pub window_start: i64,
    pub last_event_time: i64,
    pub messages: Vec<Message>,
}

impl SessionWindow {
    fn open(message: Message) -> Self {
        Self {
            chat_id: message.chat_id,
            window_start: message.timestamp,
            last_event_time: message.timestamp,
            messages: vec![message],
        }
    }

    fn admit(&mut self, message: Message) {
        self.window_start = self.window_start.min(message.timestamp);
        self.last_event_time = self.last_event_time.max(message.timestamp);
        self.messages.push(message);
    }

    fn absorb(&mut self, other: SessionWindow) {
        self.window_start = self.window_start.min(other.window_start);
        self.last_event_time = self.last_event_time.max(other.last_event_time);
        self.messages.extend(other.messages);
    }

    /// Whether an event at `timestamp` falls within `gap` of this window's
    /// span and therefore belongs to the same session.
    fn spans(&self, timestamp: i64, gap: i64) -> bool {
        timestamp >= self.window_start - gap && timestamp <= self.last_event_time + gap
    }
}

#[derive(Debug)]
struct ChatState {
    watermark: i64,
    windows: Vec<SessionWindow>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            watermark: i64::MIN,
            windows: Vec::new(),
        }
    }
}

/// Keys the message stream by chat and assigns each message to a session
/// window based on event-time inactivity gaps.
///
/// Watermarks advance independently per chat: a quiet chat never blocks a
/// noisy one from closing its windows. Duplicate deliveries pass through
/// untouched; deduplication belongs to the reducer.
pub struct SessionWindowAssigner {
    config: SessionWindowConfig,
    chats: HashMap<i64, ChatState>,
    metrics: Arc<PipelineMetrics>,
}

impl SessionWindowAssigner {
    pub fn new(config: SessionWindowConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            config,
            chats: HashMap::new(),
            metrics,
        }
    }

    /// Feed one message through the state machine. Returns every window of
    /// that chat whose grace period the advancing watermark has now passed;
    /// each window is emitted exactly once.
    pub fn observe(&mut self, message: Message) -> Vec<SessionWindow> {
        let gap = self.config.session_gap_seconds;
        let grace = self.config.late_arrival_grace_seconds;

        let state = self.chats.entry(message.chat_id).or_default();
        let event_time = message.timestamp;
        state.watermark = state.watermark.max(event_time);

        if event_time < state.watermark.saturating_sub(grace) {
            debug!(
                chat_id = message.chat_id,
                id = message.id,
                event_time,
                watermark = state.watermark,
                "Dropping message beyond late-arrival grace"
            );
            self.metrics.messages_late_dropped.inc();
        } else {
            let mut joined: Vec<usize> = state
                .windows
                .iter()
                .enumerate()
                .filter(|(_, w)| w.spans(event_time, gap))
                .map(|(i, _)| i)
                .collect();

            match joined.len() {
                0 => {
                    trace!(chat_id = message.chat_id, event_time, "Opening session window");
                    state.windows.push(SessionWindow::open(message));
                }
                1 => state.windows[joined[0]].admit(message),
                _ => {
                    // A late message landed within the gap of more than one
                    // open window; those windows are one session.
                    let target = joined.remove(0);
                    for idx in joined.into_iter().rev() {
                        let absorbed = state.windows.remove(idx);
                        state.windows[target].absorb(absorbed);
                        self.metrics.windows_merged.inc();
                    }
                    state.windows[target].admit(message);
                }
            }
        }

        let watermark = state.watermark;
        let open = std::mem::take(&mut state.windows);
        let mut closed = Vec::new();
        for window in open {
            if watermark > window.last_event_time + gap + grace {
                closed.push(window);
            } else {
                state.windows.push(window);
            }
        }
        closed.sort_by_key(|w| w.window_start);
        self.metrics.windows_closed.inc_by(closed.len() as f64);
        closed
    }

    /// Force-close every open window across all chats. Used on graceful
    /// shutdown, where no further watermark advancement can happen and any
    /// buffered state would otherwise be lost.
    pub fn flush(&mut self) -> Vec<SessionWindow> {
        let mut flushed: Vec<SessionWindow> = self
            .chats
            .drain()
            .flat_map(|(_, state)| state.windows)
            .collect();
        flushed.sort_by_key(|w| (w.chat_id, w.window_start));
        self.metrics.windows_closed.inc_by(flushed.len() as f64);
        flushed
    }

    pub fn open_window_count(&self) -> usize {
        self.chats.values().map(|s| s.windows.len()).sum()
    }
}
