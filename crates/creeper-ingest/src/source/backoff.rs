//! Reconnect backoff for the upstream stream.

use std::time::Duration;

/// Reconnection settings.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,

    /// Upper bound for the delay.
    pub max_delay: Duration,

    /// Factor applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,

    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_retries: None,
        }
    }
}

/// Exponential backoff state for one reader.
///
/// The reader resets it once a connection decodes a frame it has not seen
/// before. An endpoint that accepts connections but sends nothing new, or
/// that keeps failing on the same frame, still backs off.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            current_delay,
        }
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Delay to wait before the next attempt, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_retries
            .is_some_and(|max| self.attempt >= max)
        {
            return None;
        }

        self.attempt += 1;
        let delay = self.current_delay;

        let next = self.current_delay.mul_f64(self.config.backoff_multiplier.max(1.0));
        self.current_delay = next.min(self.config.max_delay);

        Some(delay)
    }
}
