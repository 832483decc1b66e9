//! Upstream event source and reconnect loop.
//!
//! # Available Pieces
//!
//! - [`Connector`] - Opens one upstream connection from an optional cursor
//! - [`JetstreamConnector`] - Connector for a Jetstream WebSocket endpoint
//! - [`StreamReader`] - Owns the connection lifecycle and feeds the scheduler
//!
//! # Architecture
//!
//! ```text
//! Connector::connect(cursor) ──► frame stream ──► decode_frame ──► Scheduler::submit
//!          ▲                          │
//!          └──── reconnect from ──────┘ (close, read error, bad frame)
//!               CursorTracker::snapshot()
//! ```
//!
//! Upstream replays inclusively from the resume cursor, so an event that was
//! completed just before a disconnect is delivered again. Downstream consumers
//! tolerate that duplicate window.

mod backoff;
mod jetstream;
mod reader;

pub use backoff::{Backoff, ReconnectConfig};
pub use jetstream::{JetstreamConfig, JetstreamConnector};
pub use reader::{DropReason, FrameOutcome, ReaderConfig, ReaderStats, StreamReader, decode_frame};

use crate::Result;
use creeper_core::TimeUs;
use futures_util::Stream;
use std::future::Future;

/// Opens connections to the upstream event stream.
///
/// Each yielded item is one complete frame, already decompressed. The stream
/// ends when the server closes the connection; an `Err` item means the
/// connection is broken and the reader should reconnect.
pub trait Connector: Send + Sync {
    /// Frame stream of one connection.
    type Stream: Stream<Item = Result<Vec<u8>>> + Send + Unpin;

    /// Connect, replaying from `cursor` (inclusive) when given, or starting
    /// live otherwise.
    fn connect(&self, cursor: Option<TimeUs>) -> impl Future<Output = Result<Self::Stream>> + Send;
}
