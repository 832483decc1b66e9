//! Resume cursor tracking.
//!
//! The [`CursorTracker`] holds the highest upstream `time_us` whose event has
//! been fully handled. Lanes finish out of order relative to arrival, so this
//! is a high-water mark over completed work rather than a contiguous
//! watermark: replaying from it after a crash can re-deliver events that other
//! lanes already published. That is what makes delivery at-least-once.
//!
//! The value lives only for the lifetime of the process. There is no external
//! checkpoint store; a restart resumes from the configured backfill window.

use creeper_core::TimeUs;
use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel for "no event completed yet". Jetstream times are always positive.
const UNSET: TimeUs = 0;

/// Monotonic high-water mark over completed events.
///
/// Thread-safe: written by every scheduler worker, read by the stream reader
/// when it reconnects.
#[derive(Debug)]
pub struct CursorTracker {
    high_water: AtomicI64,
}

impl Default for CursorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorTracker {
    pub fn new() -> Self {
        Self {
            high_water: AtomicI64::new(UNSET),
        }
    }

    /// Record `time_us` as completed.
    ///
    /// The stored value only moves forward; calls with an older time are
    /// ignored. Returns `true` if the mark advanced.
    pub fn advance(&self, time_us: TimeUs) -> bool {
        let previous = self.high_water.fetch_max(time_us, Ordering::AcqRel);
        if time_us > previous {
            metrics::gauge!("ingest_cursor_time_us").set(time_us as f64);
            true
        } else {
            false
        }
    }

    /// Current resume point, or `None` if nothing has completed yet.
    pub fn snapshot(&self) -> Option<TimeUs> {
        match self.high_water.load(Ordering::Acquire) {
            UNSET => None,
            t => Some(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_tracker_has_no_cursor() {
        assert_eq!(CursorTracker::new().snapshot(), None);
    }

    #[test]
    fn test_out_of_order_advance_keeps_maximum() {
        let cursor = CursorTracker::new();
        assert!(cursor.advance(5));
        assert!(!cursor.advance(3));
        assert!(cursor.advance(9));
        assert!(!cursor.advance(7));
        assert_eq!(cursor.snapshot(), Some(9));
    }

    #[test]
    fn test_repeated_advance_is_idempotent() {
        let cursor = CursorTracker::new();
        assert!(cursor.advance(42));
        assert!(!cursor.advance(42));
        assert_eq!(cursor.snapshot(), Some(42));
    }

    #[test]
    fn test_concurrent_advance_never_decreases() {
        let cursor = Arc::new(CursorTracker::new());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cursor = Arc::clone(&cursor);
                std::thread::spawn(move || {
                    // Each thread walks its own interleaved slice backwards
                    for i in (0..1000).rev() {
                        cursor.advance(i * 8 + worker + 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cursor.snapshot(), Some(999 * 8 + 7 + 1));
    }
}
