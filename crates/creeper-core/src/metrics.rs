//! Prometheus metrics helpers for creeper.
//!
//! This module provides metrics initialization and the metric descriptions
//! used by the ingestion pipeline.
//!
//! # Usage
//!
//! ```rust,ignore
//! use creeper_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("ingest_events_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: pipeline stage (`ingest_`, `scheduler_`, `publish_`)
//! - Suffix: unit or type (`_total`, `_us`)
//! - Labels: only low-cardinality ones such as `reason`

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `/metrics` on the given port and serves it from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for the pipeline metrics.
fn register_metrics() {
    // =========================================================================
    // Stream reader
    // =========================================================================

    describe_counter!("ingest_frames_total", "Frames received from Jetstream");
    describe_counter!(
        "ingest_events_dropped_total",
        "Frames dropped before scheduling (label: reason)"
    );
    describe_counter!(
        "ingest_events_submitted_total",
        "Events handed to the scheduler"
    );
    describe_counter!(
        "ingest_reconnects_total",
        "Jetstream reconnect attempts (label: reason)"
    );
    describe_gauge!(
        "ingest_cursor_time_us",
        "Highest upstream time_us whose event finished processing"
    );
    describe_gauge!(
        "ingest_running",
        "Whether the ingestion loop is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Scheduler
    // =========================================================================

    describe_counter!(
        "scheduler_events_processed_total",
        "Events whose handler completed successfully"
    );
    describe_counter!(
        "scheduler_handler_errors_total",
        "Events whose handler returned an error"
    );

    // =========================================================================
    // Filter & publish
    // =========================================================================

    describe_counter!("publish_posts_total", "Posts published to the broker");
    describe_counter!(
        "publish_posts_filtered_total",
        "Posts rejected by the filters (label: reason)"
    );
    describe_counter!(
        "publish_decode_failures_total",
        "Records that could not be decoded as posts"
    );
    describe_counter!(
        "publish_failures_total",
        "Publish or delivery failures reported by the broker client"
    );
    describe_counter!(
        "publish_keyword_matches_total",
        "Posts matching a watched keyword"
    );
}
