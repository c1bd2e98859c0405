use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::metrics::PipelineMetrics;
use super::models::{Conversation, Message};
use super::reducer::reduce_window;
use super::retry::RetryPolicy;
use super::sink::UpsertSink;
use super::source::QueueSource;
use super::window::SessionWindowAssigner;

const CHANNEL_CAPACITY: usize = 16;

/// The long-running ingestion-to-upsert dataflow.
///
/// Three workers connected by bounded channels: a queue poller on a timer,
/// the windowing state machine, and the upsert worker. Each chat's window
/// state is owned exclusively by the windowing worker; the only shared
/// resources are the queue and the index, each behind its own client.
///
/// Shutdown stops the poller first; channel closure then cascades
/// downstream, and the windowing worker force-closes its open windows so no
/// buffered state is lost (window state itself is never persisted — only
/// the raw messages in the queue survive a crash).
pub struct Pipeline {
    source: QueueSource,
    assigner: SessionWindowAssigner,
    sink: Arc<UpsertSink>,
    metrics: Arc<PipelineMetrics>,
    poll_interval: Duration,
    drain_retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        source: QueueSource,
        assigner: SessionWindowAssigner,
        sink: Arc<UpsertSink>,
        metrics: Arc<PipelineMetrics>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            assigner,
            sink,
            metrics,
            poll_interval,
            drain_retry: RetryPolicy::default(),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Pipeline {
            source,
            mut assigner,
            sink,
            metrics,
            poll_interval,
            drain_retry,
        } = self;

        let (message_tx, mut message_rx) = mpsc::channel::<Vec<Message>>(CHANNEL_CAPACITY);
        let (conversation_tx, mut conversation_rx) =
            mpsc::channel::<Vec<Conversation>>(CHANNEL_CAPACITY);

        let poller = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Shutdown signal received, stopping queue poller");
                        break;
                    }
                    _ = ticker.tick() => {
                        match drain_retry.execute(|| source.poll()).await {
                            Ok(batch) => {
                                if batch.is_empty() {
                                    continue;
                                }
                                if message_tx.send(batch).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Queue drain failed, retrying on next poll: {}", e);
                            }
                        }
                    }
                }
            }
        });

        let windower = tokio::spawn(async move {
            while let Some(batch) = message_rx.recv().await {
                let mut conversations = Vec::new();
                for message in batch {
                    for window in assigner.observe(message) {
                        if let Some(conversation) = reduce_window(window) {
                            metrics.conversations_reduced.inc();
                            conversations.push(conversation);
                        }
                    }
                }
                if !conversations.is_empty() && conversation_tx.send(conversations).await.is_err()
                {
                    break;
                }
            }

            let flushed: Vec<Conversation> = assigner
                .flush()
                .into_iter()
                .filter_map(reduce_window)
                .collect();
            if !flushed.is_empty() {
                info!(count = flushed.len(), "Flushing open session windows on shutdown");
                metrics.conversations_reduced.inc_by(flushed.len() as f64);
                let _ = conversation_tx.send(flushed).await;
            }
        });

        let upserter = tokio::spawn(async move {
            while let Some(conversations) = conversation_rx.recv().await {
                if let Err(e) = sink.write(conversations).await {
                    error!("Upsert stage failed: {:#}", e);
                }
            }
        });

        poller.await?;
        windower.await?;
        upserter.await?;
        info!("Pipeline stopped");
        Ok(())
    }
}
