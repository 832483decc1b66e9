//! Creeper ingestion pipeline.
//!
//! This crate streams Bluesky repository commits from a Jetstream endpoint,
//! keeps the posts that pass the configured filters, and republishes them to
//! Kafka keyed by author.
//!
//! # Modules
//!
//! - [`source`] - Jetstream connector and the reconnecting stream reader
//! - [`scheduler`] - Ordering-aware worker pool (per-account FIFO, bounded concurrency)
//! - [`cursor`] - High-water mark used as the reconnect cursor
//! - [`pipeline`] - Filters and the filter & publish handler
//! - [`publish`] - Kafka and JSON-lines publishers
//! - [`logging`] - Log subscriber (stderr, text or JSON)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  StreamReader   │  WebSocket, reconnects from the cursor
//! └────────┬────────┘
//!          │ submit (blocks when the lane is full)
//!          ▼
//! ┌─────────────────┐
//! │    Scheduler    │  lane = fnv1a(did) % workers, one worker per lane
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  PostProcessor  │  decode → filter → publish
//! └────────┬────────┘      │
//!          │               └──► CursorTracker::advance on success
//!          ▼
//! ┌─────────────────┐
//! │    Publisher    │  Kafka topic `raw-posts`, key = did
//! └─────────────────┘
//! ```
//!
//! Delivery is at-least-once: after a disconnect the reader resumes from the
//! highest completed event, and upstream replays from it inclusively.

pub mod config;
pub mod cursor;
pub mod error;
pub mod ingestor;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod scheduler;
pub mod source;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use cursor::CursorTracker;
pub use ingestor::{IngestSummary, Ingestor, IngestorConfig};
pub use pipeline::{DecodePolicy, KeywordMatcher, LanguageFilter, PostFilter, PostProcessor};
pub use publish::{LinePublisher, Publisher, Sink, StdoutPublisher};
pub use scheduler::{EventHandler, FnHandler, Scheduler, SchedulerConfig, SchedulerStats, lane_for};
pub use source::{
    Connector, JetstreamConfig, JetstreamConnector, ReaderConfig, ReaderStats, ReconnectConfig,
    StreamReader,
};

#[cfg(feature = "kafka")]
pub use publish::{KafkaConfig, KafkaPublisher};
