//! Ordering-aware worker pool.
//!
//! The [`Scheduler`] fans a single ordered event stream out to a fixed number
//! of lanes. Each lane is a bounded queue drained by exactly one worker task,
//! so:
//!
//! - at most `workers` events are handled concurrently;
//! - events with the same `did` always land in the same lane and are handled
//!   strictly in submission order, one after the other;
//! - events of different lanes run fully concurrently;
//! - [`Scheduler::submit`] suspends the caller while the target lane is full,
//!   which pushes backpressure all the way back to the upstream socket.
//!
//! # Lane Assignment
//!
//! Keys map to lanes with 64-bit FNV-1a over the key bytes, modulo the lane
//! count (see [`lane_for`]). The hash is stable across runs and platforms, so
//! tests can pick same-lane and different-lane keys deterministically.
//!
//! # Failure Handling
//!
//! A handler error is logged and the lane moves on to its next event. A
//! fatal error (see [`Error::is_fatal`]) or a panic stops the worker and
//! trips the pool's failure token; the stream reader watches that token and
//! returns the error, which ends the process.

use crate::cursor::CursorTracker;
use crate::{Error, Result};
use creeper_core::Event;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Map an ordering key onto one of `lanes` lanes.
///
/// # Panics
///
/// Panics if `lanes` is zero.
pub fn lane_for(key: &str, lanes: usize) -> usize {
    assert!(lanes > 0, "scheduler needs at least one lane");
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % lanes as u64) as usize
}

/// Processes one event on behalf of a lane worker.
///
/// Returning `Ok` marks the event complete and lets the cursor advance past
/// it. Handlers run on a tokio worker and may await (e.g. on a publisher
/// whose buffer is full); doing so only stalls their own lane.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &Event) -> impl Future<Output = Result<()>> + Send;
}

/// Adapter turning an async closure into an [`EventHandler`].
///
/// The closure receives its own clone of the event.
pub struct FnHandler<F>(pub F);

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    fn handle(&self, event: &Event) -> impl Future<Output = Result<()>> + Send {
        (self.0)(event.clone())
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of lanes, and therefore of concurrently handled events.
    pub workers: usize,

    /// Queue capacity per lane. Submitting to a full lane waits.
    pub lane_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 250,
            lane_capacity: 100,
        }
    }
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Events whose handler returned `Ok`.
    pub processed: u64,
    /// Events whose handler returned a non-fatal error.
    pub failed: u64,
}

/// Ordering-aware worker pool.
pub struct Scheduler {
    lanes: Vec<mpsc::Sender<Event>>,
    workers: Vec<JoinHandle<()>>,
    /// Tripped when a worker dies; observed by the stream reader.
    failed: CancellationToken,
    /// First fatal error message reported by a worker.
    failure: Arc<Mutex<Option<String>>>,
    counters: Arc<Counters>,
}

impl Scheduler {
    /// Spawn the lane workers.
    ///
    /// Must be called from within a tokio runtime. `workers` and
    /// `lane_capacity` are clamped to at least 1.
    pub fn new<H: EventHandler>(
        config: SchedulerConfig,
        handler: Arc<H>,
        cursor: Arc<CursorTracker>,
    ) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.lane_capacity.max(1);

        let failed = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));
        let counters = Arc::new(Counters::default());

        let mut lanes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for lane in 0..workers {
            let (tx, rx) = mpsc::channel(capacity);
            let worker = LaneWorker {
                lane,
                rx,
                handler: Arc::clone(&handler),
                cursor: Arc::clone(&cursor),
                failed: failed.clone(),
                failure: Arc::clone(&failure),
                counters: Arc::clone(&counters),
            };
            lanes.push(tx);
            handles.push(tokio::spawn(worker.run()));
        }

        tracing::info!(workers, lane_capacity = capacity, "Scheduler started");

        Self {
            lanes,
            workers: handles,
            failed,
            failure,
            counters,
        }
    }

    /// Number of lanes.
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Enqueue an event on its key's lane, waiting while the lane is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaneClosed`] if the lane's worker has exited.
    pub async fn submit(&self, event: Event) -> Result<()> {
        let lane = lane_for(&event.did, self.lanes.len());
        self.lanes[lane]
            .send(event)
            .await
            .map_err(|_| Error::LaneClosed(lane))
    }

    /// Token cancelled when any worker fails fatally or panics.
    pub fn failed(&self) -> CancellationToken {
        self.failed.clone()
    }

    /// The error that tripped [`Scheduler::failed`], if any.
    pub fn failure(&self) -> Option<Error> {
        self.failure.lock().clone().map(Error::Fatal)
    }

    /// Current counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events, let every lane drain, and wait for the workers.
    ///
    /// Workers still running after `drain_timeout` are aborted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] if a worker panicked,
    /// [`Error::Fatal`] if a worker stopped on a fatal handler error, or
    /// [`Error::DrainTimeout`] if the deadline passed.
    pub async fn shutdown(self, drain_timeout: Duration) -> Result<SchedulerStats> {
        let Scheduler {
            lanes,
            mut workers,
            failure,
            counters,
            ..
        } = self;

        // Closing the senders ends each worker once its queue is empty
        drop(lanes);

        let mut panicked = None;
        let joined = tokio::time::timeout(drain_timeout, async {
            for (lane, handle) in workers.iter_mut().enumerate() {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    panicked.get_or_insert(lane);
                }
            }
        })
        .await;

        if joined.is_err() {
            for handle in &workers {
                handle.abort();
            }
            tracing::warn!(?drain_timeout, "Scheduler drain timed out, aborting workers");
            return Err(Error::DrainTimeout(drain_timeout));
        }

        let stats = SchedulerStats {
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        };
        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            "Scheduler drained"
        );

        if let Some(lane) = panicked {
            return Err(Error::WorkerPanicked { lane });
        }
        if let Some(reason) = failure.lock().take() {
            return Err(Error::Fatal(reason));
        }
        Ok(stats)
    }
}

/// State owned by one lane's worker task.
struct LaneWorker<H> {
    lane: usize,
    rx: mpsc::Receiver<Event>,
    handler: Arc<H>,
    cursor: Arc<CursorTracker>,
    failed: CancellationToken,
    failure: Arc<Mutex<Option<String>>>,
    counters: Arc<Counters>,
}

impl<H: EventHandler> LaneWorker<H> {
    async fn run(mut self) {
        let _guard = PanicGuard {
            lane: self.lane,
            failed: self.failed.clone(),
            failure: Arc::clone(&self.failure),
        };

        while let Some(event) = self.rx.recv().await {
            match self.handler.handle(&event).await {
                Ok(()) => {
                    self.cursor.advance(event.time_us);
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("scheduler_events_processed_total").increment(1);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        lane = self.lane,
                        did = %event.did,
                        time_us = event.time_us,
                        error = %e,
                        "Fatal handler error, stopping pipeline"
                    );
                    self.failure.lock().get_or_insert_with(|| e.to_string());
                    self.failed.cancel();
                    return;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("scheduler_handler_errors_total").increment(1);
                    tracing::warn!(
                        lane = self.lane,
                        did = %event.did,
                        time_us = event.time_us,
                        error = %e,
                        "Handler failed, event skipped"
                    );
                }
            }
        }
    }
}

/// Trips the failure token if the worker unwinds.
struct PanicGuard {
    lane: usize,
    failed: CancellationToken,
    failure: Arc<Mutex<Option<String>>>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(lane = self.lane, "Scheduler worker panicked");
            self.failure
                .lock()
                .get_or_insert_with(|| format!("worker for lane {} panicked", self.lane));
            self.failed.cancel();
        }
    }
}
