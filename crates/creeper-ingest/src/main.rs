//! Creeper ingestion daemon.
//!
//! Streams posts from Jetstream, filters them by language and publishes the
//! survivors to Kafka.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 8 hours of backfill, English posts, Kafka on localhost:9092
//! creeper-ingest
//!
//! # Production logging against a remote broker
//! ENV=prod KAFKA_ADDRESS=kafka.internal creeper-ingest
//!
//! # Local inspection without a broker (logs stay on stderr)
//! creeper-ingest --sink stdout --backfill-hours 0 > posts.jsonl
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT/SIGTERM:
//! 1. Stops reading from Jetstream
//! 2. Drains every scheduler lane
//! 3. Flushes the publisher
//! 4. Logs the cursor a restart would resume from
//!
//! A worker panic or a fatal decode error ends the process with a non-zero
//! exit code so the supervisor restarts it.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use creeper_core::metrics::{init_metrics, start_metrics_server};
use creeper_ingest::config::{Args, Environment, SinkKind};
use creeper_ingest::{Ingestor, JetstreamConnector, Sink, StdoutPublisher, logging};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let args = Args::parse();
    init_tracing(args.env)?;

    tracing::info!("Creeper ingestion daemon starting...");
    args.validate()?;

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        signal.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let now = Utc::now();
    let config = args.ingestor_config(now);

    tracing::info!("Configuration:");
    tracing::info!("  Environment: {:?}", args.env);
    tracing::info!("  Jetstream: {}", args.jetstream_url);
    tracing::info!("  Collections: {}", args.wanted_collections.join(","));
    tracing::info!("  Compression: {}", args.compress);
    tracing::info!("  Workers: {} (lane capacity {})", args.workers, args.lane_capacity);
    tracing::info!("  Languages: {}", args.languages.join(","));
    tracing::info!("  Decode policy: {:?}", args.decode_policy);
    match config.initial_cursor {
        Some(cursor) => tracing::info!(
            "  Start cursor: {} ({} hours back)",
            cursor,
            args.backfill_hours
        ),
        None => tracing::info!("  Start cursor: live"),
    }

    let connector = JetstreamConnector::new(args.jetstream_config())
        .context("Failed to configure Jetstream connector")?;
    let sink = Arc::new(build_sink(&args)?);
    tracing::info!("  Sink: {}", sink.name());

    let ingestor = Ingestor::new(connector, args.processor(sink), config);
    let summary = ingestor.run(cancel).await?;

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Frames received:      {}", summary.reader.frames);
    tracing::info!("Frames dropped:       {}", summary.reader.dropped);
    tracing::info!("Events submitted:     {}", summary.reader.submitted);
    tracing::info!("Events processed:     {}", summary.scheduler.processed);
    tracing::info!("Handler errors:       {}", summary.scheduler.failed);
    tracing::info!("Reconnects:           {}", summary.reader.reconnects);
    tracing::info!(
        "Resume cursor:        {}",
        summary
            .cursor
            .map_or_else(|| "none".to_string(), |c| c.to_string())
    );

    Ok(())
}

fn init_tracing(env: Environment) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging::DEFAULT_FILTER))
        .context("Invalid log filter")?;

    // stdout belongs to the JSON-lines sink
    tracing::subscriber::set_global_default(logging::subscriber(env, filter, std::io::stderr))
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn build_sink(args: &Args) -> Result<Sink> {
    match args.sink {
        SinkKind::Stdout => Ok(Sink::Stdout(StdoutPublisher::stdout())),
        #[cfg(feature = "kafka")]
        SinkKind::Kafka => {
            let publisher = creeper_ingest::KafkaPublisher::new(args.kafka_config())
                .context("Failed to create Kafka producer")?;
            Ok(Sink::Kafka(publisher))
        }
        #[cfg(not(feature = "kafka"))]
        SinkKind::Kafka => anyhow::bail!("built without Kafka support"),
    }
}
