//! Exponential backoff for transient fetch failures.

use std::time::Duration;

use chainfeed_core::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial: Duration,
    cap: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial: Duration::from_millis(config.initial_backoff_ms),
            cap: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based). `None` once the
    /// attempts are used up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !(1..=self.max_retries).contains(&attempt) {
            return None;
        }
        let factor = self.multiplier.powi(attempt as i32 - 1);
        let delay = Duration::try_from_secs_f64(self.initial.as_secs_f64() * factor).unwrap_or(self.cap);
        Some(delay.min(self.cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
