//! Stream reader and reconnect loop.

use super::{Backoff, Connector, ReconnectConfig};
use crate::cursor::CursorTracker;
use crate::scheduler::Scheduler;
use crate::{Error, Result};
use creeper_core::{Event, EventKind, Frame, Operation, POST_COLLECTION, TimeUs};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Configuration for the stream reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Collections handed to the scheduler. Empty means all.
    pub wanted_collections: HashSet<String>,

    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            wanted_collections: HashSet::from([POST_COLLECTION.to_string()]),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Why a well-formed frame was not scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Identity, account or unknown frame kind.
    NotCommit(EventKind),
    /// Commit frame without a commit body.
    MissingCommit,
    /// Commit with an operation this build does not know.
    UnknownOperation,
    /// Commit to a collection outside the wanted set.
    UnwantedCollection,
}

impl DropReason {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotCommit(_) => "not_commit",
            Self::MissingCommit => "missing_commit",
            Self::UnknownOperation => "unknown_operation",
            Self::UnwantedCollection => "unwanted_collection",
        }
    }
}

/// Result of decoding one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Event(Event),
    Dropped { time_us: TimeUs, reason: DropReason },
}

impl FrameOutcome {
    /// Upstream time of the frame, whether or not it is scheduled.
    pub fn time_us(&self) -> TimeUs {
        match self {
            Self::Event(event) => event.time_us,
            Self::Dropped { time_us, .. } => *time_us,
        }
    }
}

/// Decode a raw frame and apply the collection filter.
///
/// # Errors
///
/// Returns an error if the frame is not a valid Jetstream envelope. The
/// reader treats that as a broken connection.
pub fn decode_frame(bytes: &[u8], wanted: &HashSet<String>) -> Result<FrameOutcome> {
    let frame = Frame::from_slice(bytes)?;
    let time_us = frame.time_us;
    let dropped = |reason| -> Result<FrameOutcome> { Ok(FrameOutcome::Dropped { time_us, reason }) };

    if frame.kind != EventKind::Commit {
        return dropped(DropReason::NotCommit(frame.kind));
    }
    let Some(event) = frame.into_event() else {
        return dropped(DropReason::MissingCommit);
    };
    if event.operation == Operation::Unknown {
        return dropped(DropReason::UnknownOperation);
    }
    if !wanted.is_empty() && !wanted.contains(&event.collection) {
        return dropped(DropReason::UnwantedCollection);
    }
    Ok(FrameOutcome::Event(event))
}

/// Reader statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames received across all connections.
    pub frames: u64,
    /// Events handed to the scheduler.
    pub submitted: u64,
    /// Well-formed frames not scheduled.
    pub dropped: u64,
    /// Connections opened successfully.
    pub connections: u64,
    /// Reconnect attempts.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    submitted: AtomicU64,
    dropped: AtomicU64,
    connections: AtomicU64,
    reconnects: AtomicU64,
}

/// How one connection ended.
enum Disconnect {
    Cancelled,
    Failed(Error),
    Lost(&'static str),
}

/// Owns the upstream connection and feeds decoded events to the scheduler.
pub struct StreamReader<C> {
    connector: C,
    config: ReaderConfig,
    counters: Counters,
}

impl<C: Connector> StreamReader<C> {
    pub fn new(connector: C, config: ReaderConfig) -> Self {
        Self {
            connector,
            config,
            counters: Counters::default(),
        }
    }

    /// Read until cancelled or until the scheduler fails.
    ///
    /// The first connection starts at `initial_cursor`. Every reconnect
    /// resumes from `cursor.snapshot()`, falling back to `initial_cursor`
    /// while nothing has completed yet.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's fatal error if a worker died, or
    /// [`Error::Transport`] once reconnect retries are exhausted. Cancellation
    /// is not an error.
    pub async fn run(
        &self,
        scheduler: &Scheduler,
        cursor: &CursorTracker,
        initial_cursor: Option<TimeUs>,
        cancel: &CancellationToken,
    ) -> Result<ReaderStats> {
        let failed = scheduler.failed();
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        // Furthest frame decoded on any connection; replays below it are not progress
        let mut furthest = initial_cursor.unwrap_or(0);

        metrics::gauge!("ingest_running").set(1.0);
        tracing::info!(
            initial_cursor = ?initial_cursor,
            wanted = ?self.config.wanted_collections,
            "Stream reader starting"
        );

        let result = loop {
            let resume = cursor.snapshot().or(initial_cursor);

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = failed.cancelled() => break Err(scheduler_failure(scheduler)),
                connected = self.connector.connect(resume) => connected,
            };

            let reason = match connected {
                Ok(mut stream) => {
                    self.counters.connections.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(cursor = ?resume, "Connected to upstream");

                    match self
                        .pump(&mut stream, scheduler, &mut backoff, &mut furthest, cancel, &failed)
                        .await
                    {
                        Disconnect::Cancelled => break Ok(()),
                        Disconnect::Failed(e) => break Err(e),
                        Disconnect::Lost(reason) => reason,
                    }
                }
                Err(e) => {
                    tracing::warn!(cursor = ?resume, error = %e, "Upstream connect failed");
                    "connect_failed"
                }
            };

            let Some(delay) = backoff.next_delay() else {
                break Err(Error::Transport(format!(
                    "gave up after {} reconnect attempts",
                    backoff.attempt()
                )));
            };

            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ingest_reconnects_total", "reason" => reason).increment(1);
            tracing::warn!(
                reason,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                cursor = ?cursor.snapshot().or(initial_cursor),
                "Reconnecting to upstream"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = failed.cancelled() => break Err(scheduler_failure(scheduler)),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        metrics::gauge!("ingest_running").set(0.0);
        let stats = self.build_stats();
        tracing::info!(
            frames = stats.frames,
            submitted = stats.submitted,
            dropped = stats.dropped,
            reconnects = stats.reconnects,
            cursor = ?cursor.snapshot(),
            "Stream reader stopped"
        );

        result.map(|()| stats)
    }

    /// Drive one connection until it ends.
    ///
    /// The backoff resets only when a frame decodes past `furthest`, so a
    /// connection that replays known frames and then breaks on the same
    /// undecodable one keeps backing off.
    async fn pump(
        &self,
        stream: &mut C::Stream,
        scheduler: &Scheduler,
        backoff: &mut Backoff,
        furthest: &mut TimeUs,
        cancel: &CancellationToken,
        failed: &CancellationToken,
    ) -> Disconnect {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Disconnect::Cancelled,
                _ = failed.cancelled() => return Disconnect::Failed(scheduler_failure(scheduler)),
                next = stream.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream read failed");
                    return Disconnect::Lost("read_error");
                }
                None => {
                    tracing::info!("Upstream closed the connection");
                    return Disconnect::Lost("closed");
                }
            };

            self.counters.frames.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ingest_frames_total").increment(1);

            let outcome = decode_frame(&bytes, &self.config.wanted_collections);
            if let Ok(decoded) = &outcome
                && decoded.time_us() > *furthest
            {
                *furthest = decoded.time_us();
                backoff.reset();
            }

            let event = match outcome {
                Ok(FrameOutcome::Event(event)) => event,
                Ok(FrameOutcome::Dropped { time_us, reason }) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("ingest_events_dropped_total", "reason" => reason.as_str())
                        .increment(1);
                    match reason {
                        DropReason::NotCommit(kind) => {
                            tracing::trace!(time_us, kind = kind.as_str(), "Frame dropped")
                        }
                        _ => tracing::trace!(time_us, reason = reason.as_str(), "Frame dropped"),
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        bytes = bytes.len(),
                        "Undecodable frame, reconnecting"
                    );
                    return Disconnect::Lost("bad_frame");
                }
            };

            let time_us = event.time_us;
            // Waiting on a full lane leaves the socket unread
            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Disconnect::Cancelled,
                _ = failed.cancelled() => return Disconnect::Failed(scheduler_failure(scheduler)),
                submitted = scheduler.submit(event) => submitted,
            };

            match submitted {
                Ok(()) => {
                    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("ingest_events_submitted_total").increment(1);
                }
                Err(e) => {
                    tracing::error!(time_us, error = %e, "Scheduler rejected event");
                    return Disconnect::Failed(e);
                }
            }
        }
    }

    /// Current statistics.
    pub fn build_stats(&self) -> ReaderStats {
        ReaderStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            connections: self.counters.connections.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

fn scheduler_failure(scheduler: &Scheduler) -> Error {
    scheduler
        .failure()
        .unwrap_or_else(|| Error::Fatal("scheduler failed".to_string()))
}
