use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error};

use super::metrics::PipelineMetrics;
use super::models::Conversation;
use super::retry::RetryPolicy;
use crate::index::VectorIndex;

/// Upsert batching, pacing and retry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertConfig {
    /// Target conversations per upsert call; determines the bin count.
    pub target_batch_size: usize,

    /// Sleep between upsert batches to respect the index's rate ceiling.
    pub pacing_seconds: u64,

    /// Bounded attempts per batch before it is logged and skipped.
    pub max_attempts: u32,

    /// Fixed wait between attempts.
    pub retry_wait_seconds: u64,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            target_batch_size: 64,
            pacing_seconds: 5,
            max_attempts: 3,
            retry_wait_seconds: 1,
        }
    }
}

/// Repack a burst of conversations into size-balanced batches.
///
/// Longest-processing-time-first: sort by text length descending, then put
/// each conversation into the currently lightest of `ceil(n / target)` bins.
/// Individual conversations vary in length by orders of magnitude, so fixed
/// chunking would produce wildly uneven payloads.
pub fn pack_batches(
    mut conversations: Vec<Conversation>,
    target_batch_size: usize,
) -> Vec<Vec<Conversation>> {
    if conversations.is_empty() {
        return Vec::new();
    }

    let target = target_batch_size.max(1);
    conversations.sort_by(|a, b| b.texts.len().cmp(&a.texts.len()));

    let num_bins = conversations.len().div_ceil(target);
    let mut bins: Vec<Vec<Conversation>> = (0..num_bins).map(|_| Vec::new()).collect();
    let mut loads = vec![0usize; num_bins];

    for conversation in conversations {
        let lightest = loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| **load)
            .map(|(i, _)| i)
            .unwrap_or(0);
        loads[lightest] += conversation.texts.len();
        bins[lightest].push(conversation);
    }

    bins
}

/// Terminal stage: writes reduced conversations to the vector index in
/// balanced batches, with bounded retries and inter-batch pacing.
///
/// A batch that keeps failing is logged and skipped rather than blocking the
/// pipeline; it stays recoverable from the queue's processed list.
pub struct UpsertSink {
    index: Arc<dyn VectorIndex>,
    config: UpsertConfig,
    metrics: Arc<PipelineMetrics>,
    retry: RetryPolicy,
}

impl UpsertSink {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        config: UpsertConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.max_attempts,
            Duration::from_secs(config.retry_wait_seconds),
        );
        Self {
            index,
            config,
            metrics,
            retry,
        }
    }

    pub async fn write(&self, conversations: Vec<Conversation>) -> Result<()> {
        if conversations.is_empty() {
            return Ok(());
        }

        let batches = pack_batches(conversations, self.config.target_batch_size);
        let total = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            let batch_size = batch.len();
            let total_chars: usize = batch.iter().map(|c| c.texts.len()).sum();

            match self.retry.execute(|| self.index.upsert(&batch)).await {
                Ok(()) => {
                    self.metrics.record_upsert_batch(batch_size, total_chars).await;
                    debug!(
                        batch = i + 1,
                        batches = total,
                        conversations = batch_size,
                        chars = total_chars,
                        "Upserted conversation batch"
                    );
                }
                Err(e) => {
                    self.metrics.upsert_failures.inc();
                    error!(
                        batch = i + 1,
                        batches = total,
                        conversations = batch_size,
                        "Upsert batch failed after {} attempts, skipping: {:#}",
                        self.config.max_attempts,
                        e
                    );
                }
            }

            if i + 1 < total && self.config.pacing_seconds > 0 {
                sleep(Duration::from_secs(self.config.pacing_seconds)).await;
            }
        }

        Ok(())
    }
}
