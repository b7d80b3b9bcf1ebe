//! wirespy ingestion daemon.
//!
//! Replays captured network events from JSONL into the ingestion pipeline
//! and persists them to SQLite or ClickHouse.
//!
//! # Usage
//!
//! ```bash
//! # Replay a capture into a local SQLite database
//! wirespy-ingest -i ./captures/
//!
//! # Into ClickHouse, creating tables on first run
//! wirespy-ingest -i capture.jsonl \
//!     --store clickhouse \
//!     --clickhouse-url http://clickhouse:8123 \
//!     --clickhouse-init
//! ```
//!
//! # Graceful Shutdown
//!
//! Ctrl+C stops the replay. The pipeline then drains its queues, flushes
//! every buffer, and prints a summary.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use wirespy_core::metrics::{init_metrics, start_metrics_server};
use wirespy_ingest::{
    ClickHouseConfig, ClickHouseStore, EventSource, IngestStats, JsonlConfig, JsonlSource,
    Pipeline, PipelineConfig, RetryPolicy, SourceStats, SqliteStore, Store,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Sqlite,
    Clickhouse,
}

/// wirespy ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "wirespy-ingest")]
#[command(about = "Replay captured p2p network events into a durable store")]
#[command(version)]
struct Args {
    /// Input JSONL file or directory path
    #[arg(short, long)]
    input: PathBuf,

    /// Storage backend
    #[arg(long, value_enum, default_value = "sqlite")]
    store: Backend,

    /// SQLite database path
    #[arg(long, default_value = "./data/wirespy.db")]
    sqlite_path: PathBuf,

    /// ClickHouse URL
    #[arg(long, default_value = "http://localhost:8123")]
    clickhouse_url: String,

    /// ClickHouse database name
    #[arg(long, default_value = "wirespy")]
    clickhouse_db: String,

    /// Create ClickHouse tables before ingesting
    #[arg(long)]
    clickhouse_init: bool,

    /// Capacity of each per-kind queue
    #[arg(long, default_value = "10000")]
    queue_capacity: usize,

    /// Flush batched kinds once a buffer holds more than this many records
    #[arg(long, default_value = "1000")]
    batch_size: usize,

    /// Records persisted per block/transaction hash
    #[arg(long, default_value = "20")]
    max_per_key: i64,

    /// Hashes remembered for duplicate suppression
    #[arg(long, default_value = "10000")]
    max_tracked_keys: usize,

    /// Flush buffers older than this many seconds (0 to disable)
    #[arg(long, default_value = "30")]
    flush_interval_secs: u64,

    /// Deadline for a single store call, in milliseconds
    #[arg(long, default_value = "5000")]
    write_timeout_ms: u64,

    /// Retries for a failed store write
    #[arg(long, default_value = "3")]
    max_retries: usize,

    /// Stop at the first malformed line instead of skipping it
    #[arg(long)]
    strict: bool,

    /// Limit number of files to process
    #[arg(long)]
    limit: Option<usize>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.queue_capacity,
            batch_size: self.batch_size,
            max_per_key: self.max_per_key,
            max_tracked_keys: self.max_tracked_keys,
            flush_interval: (self.flush_interval_secs > 0)
                .then(|| Duration::from_secs(self.flush_interval_secs)),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
        }
    }

    fn jsonl_config(&self) -> JsonlConfig {
        JsonlConfig {
            input: self.input.clone(),
            continue_on_error: !self.strict,
            limit: self.limit,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("wirespy_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("wirespy ingestion daemon starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let config = args.pipeline_config();
    tracing::info!("Configuration:");
    tracing::info!("  Input: {}", args.input.display());
    tracing::info!("  Store: {:?}", args.store);
    tracing::info!("  Queue capacity: {}", config.queue_capacity);
    tracing::info!("  Batch size: {}", config.batch_size);
    tracing::info!(
        "  Suppression: {} per hash, {} hashes tracked",
        config.max_per_key,
        config.max_tracked_keys
    );

    let start = Instant::now();
    let (source_stats, ingest_stats) = match args.store {
        Backend::Sqlite => {
            let store = SqliteStore::open(&args.sqlite_path, config.write_timeout)
                .with_context(|| format!("Failed to open {}", args.sqlite_path.display()))?;
            replay_blocking(args.jsonl_config(), config, store, running).await?
        }
        Backend::Clickhouse => {
            let store = ClickHouseStore::new(ClickHouseConfig {
                url: args.clickhouse_url.clone(),
                database: args.clickhouse_db.clone(),
            });
            if args.clickhouse_init {
                store
                    .create_tables()
                    .await
                    .context("Failed to create ClickHouse tables")?;
            }
            replay_blocking(args.jsonl_config(), config, store, running).await?
        }
    };

    print_summary(&source_stats, &ingest_stats, start.elapsed());
    Ok(())
}

/// Run the replay on the blocking pool; enqueue blocks under backpressure.
async fn replay_blocking<S: Store>(
    jsonl: JsonlConfig,
    config: PipelineConfig,
    store: S,
    running: Arc<AtomicBool>,
) -> Result<(SourceStats, IngestStats)> {
    tokio::task::spawn_blocking(move || replay(jsonl, config, store, running))
        .await
        .context("Replay task panicked")?
}

fn replay<S: Store>(
    jsonl: JsonlConfig,
    config: PipelineConfig,
    store: S,
    running: Arc<AtomicBool>,
) -> Result<(SourceStats, IngestStats)> {
    let mut pipeline = Pipeline::start(config, store).context("Failed to start pipeline")?;
    let handle = pipeline.handle();

    let mut source = JsonlSource::new(jsonl);
    tracing::info!("Starting {} replay...", source.name());

    let source_result = source.process(|event| {
        if !running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        handle.enqueue(event)?;
        Ok(true)
    });

    tracing::info!("Shutting down...");
    let ingest_stats = pipeline.close().context("Failed to close pipeline")?;
    let source_stats = source_result.context("Replay failed")?;

    Ok((source_stats, ingest_stats))
}

fn print_summary(source: &SourceStats, ingest: &IngestStats, elapsed: Duration) {
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Files processed:      {}", source.files_processed);
    tracing::info!("Lines read:           {}", source.total_events);
    tracing::info!("Invalid lines:        {}", source.invalid_events);
    tracing::info!("Records received:     {}", ingest.received);
    tracing::info!("Records invalid:      {}", ingest.invalid);
    tracing::info!("Records suppressed:   {}", ingest.suppressed);
    tracing::info!("Records written:      {}", ingest.written);
    tracing::info!("Conflicts ignored:    {}", ingest.conflicts_ignored);
    tracing::info!("Records dropped:      {}", ingest.dropped);
    tracing::info!(
        "Batches flushed:      {} size, {} idle, {} drain",
        ingest.size_flushes,
        ingest.idle_flushes,
        ingest.drain_flushes
    );
    tracing::info!("Elapsed:              {:.1}s", elapsed.as_secs_f64());
}
