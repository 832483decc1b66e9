//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
///
/// Errors fall into two classes. Per-event errors (publish failures, bad
/// records under the skip policy) are logged by the scheduler and the lane
/// moves on. Fatal errors (see [`Error::is_fatal`]) stop the pipeline so the
/// process exits and its supervisor restarts it from the last cursor.
#[derive(Error, Debug)]
pub enum Error {
    /// Event model error (frame or record decoding).
    #[error(transparent)]
    Core(#[from] creeper_core::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint URL could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream stream failed in a way that is not worth retrying.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broker client rejected or failed a publish.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The publisher was used after `close()`.
    #[error("publisher already closed")]
    PublisherClosed,

    /// A scheduler lane stopped accepting events because its worker exited.
    #[error("scheduler lane {0} is closed")]
    LaneClosed(usize),

    /// A scheduler worker panicked.
    #[error("scheduler worker for lane {lane} panicked")]
    WorkerPanicked {
        /// Lane whose worker died.
        lane: usize,
    },

    /// Lanes did not drain within the shutdown deadline.
    #[error("scheduler did not drain within {0:?}")]
    DrainTimeout(std::time::Duration),

    /// Unrecoverable condition raised by a handler.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether this error must terminate the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Fatal(_) | Error::LaneClosed(_) | Error::WorkerPanicked { .. }
        )
    }
}
