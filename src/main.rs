use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recollect::pipeline::retry::RetryPolicy;
use recollect::{
    ArchiveSource, Config, Distance, MessageQueue, Pipeline, PipelineMetrics, QdrantIndex,
    QueueSource, RedisMessageQueue, SessionWindowAssigner, SimpleEmbedder, UpsertSink, VectorIndex,
};

#[derive(Parser)]
#[command(name = "recollect")]
#[command(about = "Conversation memory pipeline - windows chat streams into a vector index")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion-to-upsert pipeline until interrupted
    Start,
    /// Parse a historical chat export and enqueue it for windowing
    Import {
        /// Chat identity the export belongs to
        #[arg(long)]
        chat_id: i64,
        /// Path to the export JSON file
        #[arg(long)]
        file: PathBuf,
    },
    /// Query the conversation index
    Search {
        query: String,
        /// Number of hits to return
        #[arg(long, default_value = "5")]
        limit: usize,
    },
    /// Check connectivity of the queue, index and embedder
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => run_pipeline(config).await,
        Commands::Import { chat_id, file } => run_import(config, chat_id, file).await,
        Commands::Search { query, limit } => run_search(config, query, limit).await,
        Commands::Health => run_health(config).await,
    }
}

fn build_index(config: &Config) -> Result<Arc<QdrantIndex>> {
    let embedder = Arc::new(SimpleEmbedder::from_config(&config.embedding)?);
    let distance = Distance::parse(&config.distance_metric)?;
    Ok(Arc::new(QdrantIndex::new(
        config.qdrant_url.clone(),
        config.collection_name.clone(),
        distance,
        embedder,
    )))
}

async fn run_pipeline(config: Config) -> Result<()> {
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(PipelineMetrics::new(&registry)?);

    let queue = Arc::new(
        RedisMessageQueue::connect(&config.redis_url, &config.message_queue_key)
            .await
            .context("Cannot connect to the message queue")?,
    );
    queue.ping().await.context("Message queue is unreachable")?;

    let index = build_index(&config)?;
    index
        .ensure_collection()
        .await
        .context("Cannot prepare the vector index")?;

    let source = QueueSource::new(queue, metrics.clone());
    let assigner = SessionWindowAssigner::new(config.windowing.clone(), metrics.clone());
    let sink = Arc::new(UpsertSink::new(index, config.upsert.clone(), metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, draining pipeline");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        poll_interval = config.queue_poll_interval_seconds,
        session_gap = config.windowing.session_gap_seconds,
        "Starting conversation pipeline"
    );
    Pipeline::new(
        source,
        assigner,
        sink,
        metrics,
        Duration::from_secs(config.queue_poll_interval_seconds),
    )
    .run(shutdown_rx)
    .await
}

async fn run_import(config: Config, chat_id: i64, file: PathBuf) -> Result<()> {
    let queue = RedisMessageQueue::connect(&config.redis_url, &config.message_queue_key)
        .await
        .context("Cannot connect to the message queue")?;
    queue.ping().await.context("Message queue is unreachable")?;

    let messages = ArchiveSource::new(chat_id, file.clone()).read_all()?;
    if messages.is_empty() {
        info!(path = %file.display(), "Export contained no usable messages");
        return Ok(());
    }

    RetryPolicy::default()
        .execute(|| queue.enqueue(&messages))
        .await
        .context("Failed to enqueue export")?;
    info!(count = messages.len(), chat_id, "Enqueued historical export");
    Ok(())
}

async fn run_search(config: Config, query: String, limit: usize) -> Result<()> {
    let index = build_index(&config)?;
    let hits = index.similarity_search(&query, limit).await?;

    if hits.is_empty() {
        println!("No matching conversations");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. score {:.4}", i + 1, hit.score);
        for line in hit.texts.lines().take(5) {
            println!("   {line}");
        }
        println!();
    }
    Ok(())
}

async fn run_health(config: Config) -> Result<()> {
    let mut failures = 0;

    match RedisMessageQueue::connect(&config.redis_url, &config.message_queue_key).await {
        Ok(queue) => match queue.ping().await {
            Ok(()) => {
                let queued = queue.queued_len().await.unwrap_or(0);
                println!("queue: ok ({queued} messages waiting)");
            }
            Err(e) => {
                failures += 1;
                println!("queue: unreachable ({e})");
            }
        },
        Err(e) => {
            failures += 1;
            println!("queue: unreachable ({e})");
        }
    }

    let embedder = SimpleEmbedder::from_config(&config.embedding)?;
    let health = embedder.health_check().await;
    if health.healthy {
        println!(
            "embedder: ok ({} via {}, {} ms)",
            health.model, health.provider, health.response_time_ms
        );
    } else {
        failures += 1;
        println!("embedder: unhealthy ({})", health.error.unwrap_or_default());
    }

    let index = build_index(&config)?;
    match index.health_check().await {
        Ok(()) => println!("index: ok"),
        Err(e) => {
            failures += 1;
            println!("index: unreachable ({e:#})");
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} dependency check(s) failed");
    }
    Ok(())
}
