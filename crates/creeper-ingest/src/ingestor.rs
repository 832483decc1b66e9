//! Pipeline assembly and shutdown ordering.
//!
//! [`Ingestor::run`] wires the pieces together and owns the shutdown sequence:
//!
//! 1. the stream reader stops (cancellation, retries exhausted, or a worker failure);
//! 2. the scheduler stops accepting events and drains every lane;
//! 3. the publisher is closed, flushing buffered records.
//!
//! Steps 2 and 3 run even when step 1 ended with an error, so records that were
//! already handed to the publisher are not lost.

use crate::cursor::CursorTracker;
use crate::pipeline::PostProcessor;
use crate::publish::Publisher;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
use crate::source::{Connector, ReaderConfig, ReaderStats, StreamReader};
use crate::Result;
use creeper_core::TimeUs;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub scheduler: SchedulerConfig,
    pub reader: ReaderConfig,

    /// Resume point for the first connection. `None` starts live.
    pub initial_cursor: Option<TimeUs>,

    /// How long lanes may take to drain on shutdown.
    pub drain_timeout: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            reader: ReaderConfig::default(),
            initial_cursor: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub reader: ReaderStats,
    pub scheduler: SchedulerStats,
    /// Highest completed `time_us`, the point a restart should resume from.
    pub cursor: Option<TimeUs>,
}

/// Jetstream-to-publisher pipeline.
pub struct Ingestor<C, P> {
    connector: C,
    processor: Arc<PostProcessor<P>>,
    config: IngestorConfig,
}

impl<C, P> Ingestor<C, P>
where
    C: Connector,
    P: Publisher,
{
    pub fn new(connector: C, processor: PostProcessor<P>, config: IngestorConfig) -> Self {
        Self {
            connector,
            processor: Arc::new(processor),
            config,
        }
    }

    /// Run until `cancel` fires or the pipeline fails, then drain and flush.
    ///
    /// # Errors
    ///
    /// Returns the first error of the reader, the scheduler drain, or the
    /// publisher close, in that order.
    pub async fn run(self, cancel: CancellationToken) -> Result<IngestSummary> {
        let Ingestor {
            connector,
            processor,
            config,
        } = self;

        let cursor = Arc::new(CursorTracker::new());
        let scheduler = Scheduler::new(
            config.scheduler,
            Arc::clone(&processor),
            Arc::clone(&cursor),
        );
        let reader = StreamReader::new(connector, config.reader);

        let read_result = reader
            .run(&scheduler, &cursor, config.initial_cursor, &cancel)
            .await;
        if let Err(e) = &read_result {
            tracing::error!(error = %e, "Stream reader failed, shutting down");
        }

        tracing::info!(drain_timeout = ?config.drain_timeout, "Draining scheduler");
        let drain_result = scheduler.shutdown(config.drain_timeout).await;

        let close_result = processor.publisher().close().await;
        if let Err(e) = &close_result {
            tracing::error!(error = %e, "Publisher close failed");
        }

        let reader_stats = read_result?;
        let scheduler_stats = drain_result?;
        close_result?;

        Ok(IngestSummary {
            reader: reader_stats,
            scheduler: scheduler_stats,
            cursor: cursor.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DecodePolicy, KeywordMatcher, LanguageFilter};
    use crate::publish::testing::RecordingPublisher;
    use crate::source::ReconnectConfig;
    use crate::Error;
    use futures_util::stream::{self, BoxStream, StreamExt};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Poll;

    fn post_frame(did: &str, time_us: TimeUs, lang: &str) -> Vec<u8> {
        format!(
            r#"{{"did":"{did}","time_us":{time_us},"kind":"commit","commit":{{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{{"createdAt":"2024-01-01T00:00:00Z","text":"post {time_us}","langs":["{lang}"]}}}}}}"#
        )
        .into_bytes()
    }

    /// Serves one connection with `frames`, then idles and raises `drained`.
    struct OneShotConnector {
        frames: Mutex<Option<Vec<Vec<u8>>>>,
        drained: Arc<AtomicBool>,
    }

    impl Connector for OneShotConnector {
        type Stream = BoxStream<'static, Result<Vec<u8>>>;

        async fn connect(&self, _cursor: Option<TimeUs>) -> Result<Self::Stream> {
            let frames = self.frames.lock().take().unwrap_or_default();
            let drained = Arc::clone(&self.drained);
            let tail = stream::poll_fn(move |_| {
                drained.store(true, Ordering::SeqCst);
                Poll::<Option<Result<Vec<u8>>>>::Pending
            });
            Ok(stream::iter(frames.into_iter().map(Ok)).chain(tail).boxed())
        }
    }

    fn config(workers: usize) -> IngestorConfig {
        IngestorConfig {
            scheduler: SchedulerConfig {
                workers,
                lane_capacity: 4,
            },
            reader: ReaderConfig {
                reconnect: ReconnectConfig {
                    initial_delay: Duration::from_millis(1),
                    ..Default::default()
                },
                ..Default::default()
            },
            initial_cursor: Some(1),
            drain_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_graceful_shutdown_loses_nothing() {
        let dids = ["did:plc:a", "did:plc:b", "did:plc:c", "did:plc:d", "did:plc:e"];
        let mut frames = Vec::new();
        for t in 1..=100 {
            let lang = if t % 10 == 0 { "fr" } else { "en" };
            frames.push(post_frame(dids[t as usize % dids.len()], t, lang));
        }

        let drained = Arc::new(AtomicBool::new(false));
        let connector = OneShotConnector {
            frames: Mutex::new(Some(frames)),
            drained: Arc::clone(&drained),
        };

        let publisher = Arc::new(RecordingPublisher::default());
        let processor = PostProcessor::new(Arc::clone(&publisher), DecodePolicy::Fatal)
            .with_filter(LanguageFilter::new(["en"]))
            .with_keywords(KeywordMatcher::new(["uwu"]));

        let cancel = CancellationToken::new();
        let ingestor = Ingestor::new(connector, processor, config(4));
        let handle = tokio::spawn(ingestor.run(cancel.clone()));

        // Cancel as soon as the last frame was submitted; lanes may still be busy
        tokio::time::timeout(Duration::from_secs(5), async {
            while !drained.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(summary.reader.submitted, 100);
        assert_eq!(summary.scheduler.processed, 100);
        assert_eq!(summary.cursor, Some(100));
        assert!(publisher.closed.load(Ordering::SeqCst));

        // Every English post made it out, in per-account order
        let values = publisher.values();
        assert_eq!(values.len(), 90);

        let mut last: HashMap<String, String> = HashMap::new();
        for (key, value) in publisher.keys().into_iter().zip(&values) {
            assert_eq!(value["Did"], key.as_str());
            let observed = value["TimeUS"].as_str().unwrap().to_string();
            if let Some(previous) = last.insert(key.clone(), observed.clone()) {
                assert!(previous < observed, "{key} published out of order");
            }
        }
    }

    #[tokio::test]
    async fn test_fatal_decode_stops_pipeline_and_closes_publisher() {
        let bad = br#"{"did":"did:plc:a","time_us":5,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{"text":7}}}"#;
        let connector = OneShotConnector {
            frames: Mutex::new(Some(vec![post_frame("did:plc:b", 1, "en"), bad.to_vec()])),
            drained: Arc::new(AtomicBool::new(false)),
        };

        let publisher = Arc::new(RecordingPublisher::default());
        let processor = PostProcessor::new(Arc::clone(&publisher), DecodePolicy::Fatal);
        let ingestor = Ingestor::new(connector, processor, config(2));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ingestor.run(CancellationToken::new()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::Fatal(_))));
        assert!(publisher.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_running() {
        let bad = br#"{"did":"did:plc:a","time_us":5,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{"text":7}}}"#;
        let drained = Arc::new(AtomicBool::new(false));
        let connector = OneShotConnector {
            frames: Mutex::new(Some(vec![bad.to_vec(), post_frame("did:plc:a", 6, "en")])),
            drained: Arc::clone(&drained),
        };

        let publisher = Arc::new(RecordingPublisher::default());
        let processor = PostProcessor::new(Arc::clone(&publisher), DecodePolicy::Skip);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Ingestor::new(connector, processor, config(2)).run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !drained.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.scheduler.processed, 2);
        assert_eq!(summary.cursor, Some(6));
        assert_eq!(publisher.keys(), vec!["did:plc:a"]);
    }
}
