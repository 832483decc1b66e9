//! Downstream publishers.
//!
//! A [`Publisher`] is shared read-only by every scheduler worker. `publish`
//! enqueues one keyed record and may suspend the calling worker while the
//! client's buffer is full; delivery happens in the background. `close`
//! flushes everything still buffered and is called once, after the scheduler
//! has drained.
//!
//! # Available Publishers
//!
//! - [`LinePublisher`] - Writes records as JSON lines (stdout in development)
//! - `KafkaPublisher` - Asynchronous batched Kafka producer (`kafka` feature)

#[cfg(feature = "kafka")]
mod kafka;
mod line;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaPublisher};
pub use line::{LinePublisher, StdoutPublisher};

use crate::Result;
use std::future::Future;

/// Keyed record sink.
pub trait Publisher: Send + Sync + 'static {
    /// Enqueue `value` under partition key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PublisherClosed`] after [`Publisher::close`],
    /// or the client's error if the record was rejected.
    fn publish(&self, key: &[u8], value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Flush buffered records and release the client.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Publisher chosen at startup.
pub enum Sink {
    Stdout(StdoutPublisher),
    #[cfg(feature = "kafka")]
    Kafka(KafkaPublisher),
}

impl Sink {
    pub fn name(&self) -> &'static str {
        match self {
            Sink::Stdout(_) => "stdout",
            #[cfg(feature = "kafka")]
            Sink::Kafka(_) => "kafka",
        }
    }
}

impl Publisher for Sink {
    async fn publish(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        match self {
            Sink::Stdout(p) => p.publish(key, value).await,
            #[cfg(feature = "kafka")]
            Sink::Kafka(p) => p.publish(key, value).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Sink::Stdout(p) => p.close().await,
            #[cfg(feature = "kafka")]
            Sink::Kafka(p) => p.close().await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory publisher for pipeline tests.

    use super::Publisher;
    use crate::{Error, Result};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records every published `(key, value)` pair.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub records: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        pub closed: AtomicBool,
        /// Number of upcoming publishes to fail.
        pub fail_next: AtomicUsize,
    }

    impl RecordingPublisher {
        pub fn keys(&self) -> Vec<String> {
            self.records
                .lock()
                .iter()
                .map(|(k, _)| String::from_utf8_lossy(k).into_owned())
                .collect()
        }

        pub fn values(&self) -> Vec<serde_json::Value> {
            self.records
                .lock()
                .iter()
                .map(|(_, v)| serde_json::from_slice(v).unwrap())
                .collect()
        }
    }

    impl Publisher for RecordingPublisher {
        async fn publish(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::PublisherClosed);
            }
            let failing = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(Error::Publish("injected failure".to_string()));
            }
            // Yield so concurrent publishes interleave like a real client
            tokio::task::yield_now().await;
            self.records.lock().push((key.to_vec(), value));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Err(Error::PublisherClosed);
            }
            Ok(())
        }
    }
}
