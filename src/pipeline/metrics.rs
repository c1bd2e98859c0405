use anyhow::Result;
use chrono::{DateTime, Utc};
use prometheus::{Counter, Histogram, HistogramOpts, Registry};
use tokio::sync::Mutex;

/// Counters and histograms for every stage of the pipeline.
///
/// Validation and late-data drops are accepted policy, not errors, so they
/// are only visible here.
#[derive(Debug)]
pub struct PipelineMetrics {
    pub messages_ingested: Counter,
    pub messages_invalid: Counter,
    pub messages_late_dropped: Counter,
    pub windows_closed: Counter,
    pub windows_merged: Counter,
    pub conversations_reduced: Counter,
    pub conversations_upserted: Counter,
    pub upsert_batches: Counter,
    pub upsert_failures: Counter,
    pub upsert_batch_size: Histogram,
    pub upsert_batch_chars: Histogram,
    pub last_upsert_time: Mutex<Option<DateTime<Utc>>>,
}

impl PipelineMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let messages_ingested = Counter::new(
            "pipeline_messages_ingested_total",
            "Messages drained from the queue and admitted to the pipeline",
        )?;
        registry.register(Box::new(messages_ingested.clone()))?;

        let messages_invalid = Counter::new(
            "pipeline_messages_invalid_total",
            "Messages dropped at the source for failing validation",
        )?;
        registry.register(Box::new(messages_invalid.clone()))?;

        let messages_late_dropped = Counter::new(
            "pipeline_messages_late_dropped_total",
            "Messages dropped for arriving beyond the late-arrival grace period",
        )?;
        registry.register(Box::new(messages_late_dropped.clone()))?;

        let windows_closed = Counter::new(
            "pipeline_windows_closed_total",
            "Session windows closed by watermark advancement or shutdown flush",
        )?;
        registry.register(Box::new(windows_closed.clone()))?;

        let windows_merged = Counter::new(
            "pipeline_windows_merged_total",
            "Open session windows merged by a late bridging message",
        )?;
        registry.register(Box::new(windows_merged.clone()))?;

        let conversations_reduced = Counter::new(
            "pipeline_conversations_reduced_total",
            "Closed windows reduced into conversation records",
        )?;
        registry.register(Box::new(conversations_reduced.clone()))?;

        let conversations_upserted = Counter::new(
            "pipeline_conversations_upserted_total",
            "Conversation records successfully upserted into the vector index",
        )?;
        registry.register(Box::new(conversations_upserted.clone()))?;

        let upsert_batches = Counter::new(
            "pipeline_upsert_batches_total",
            "Upsert batches sent to the vector index",
        )?;
        registry.register(Box::new(upsert_batches.clone()))?;

        let upsert_failures = Counter::new(
            "pipeline_upsert_failures_total",
            "Upsert batches abandoned after exhausting retries",
        )?;
        registry.register(Box::new(upsert_failures.clone()))?;

        let upsert_batch_size = Histogram::with_opts(
            HistogramOpts::new("pipeline_upsert_batch_size", "Conversations per upsert batch")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
        )?;
        registry.register(Box::new(upsert_batch_size.clone()))?;

        let upsert_batch_chars = Histogram::with_opts(
            HistogramOpts::new(
                "pipeline_upsert_batch_chars",
                "Total text length per upsert batch",
            )
            .buckets(vec![1e2, 1e3, 1e4, 1e5, 1e6, 1e7]),
        )?;
        registry.register(Box::new(upsert_batch_chars.clone()))?;

        Ok(Self {
            messages_ingested,
            messages_invalid,
            messages_late_dropped,
            windows_closed,
            windows_merged,
            conversations_reduced,
            conversations_upserted,
            upsert_batches,
            upsert_failures,
            upsert_batch_size,
            upsert_batch_chars,
            last_upsert_time: Mutex::new(None),
        })
    }

    pub async fn record_upsert_batch(&self, batch_size: usize, total_chars: usize) {
        self.conversations_upserted.inc_by(batch_size as f64);
        self.upsert_batches.inc();
        self.upsert_batch_size.observe(batch_size as f64);
        self.upsert_batch_chars.observe(total_chars as f64);
        *self.last_upsert_time.lock().await = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once_per_registry() {
        let registry = Registry::new();
        assert!(PipelineMetrics::new(&registry).is_ok());
        // Registering the same metric names twice on one registry is an error.
        assert!(PipelineMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn test_record_upsert_batch_updates_counters() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry).unwrap();

        metrics.record_upsert_batch(3, 1200).await;
        assert_eq!(metrics.conversations_upserted.get() as u64, 3);
        assert_eq!(metrics.upsert_batches.get() as u64, 1);
        assert!(metrics.last_upsert_time.lock().await.is_some());
    }
}
