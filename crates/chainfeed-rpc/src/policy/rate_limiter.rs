//! Token bucket shared by every call of one client.
//!
//! One logical call (a single request or a whole batch) costs one token.
//! [`RateLimiter::acquire`] suspends until a token is free; callers race it
//! against their cancellation token, so dropping the future gives up the
//! wait without consuming anything.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use chainfeed_core::RateLimiterConfig;

const COST: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Starts full.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_per_sec: config.refill_rate,
            bucket: Mutex::new(Bucket {
                tokens: config.capacity,
                refreshed: Instant::now(),
            }),
        }
    }

    /// Take a token, or report how long until one is available.
    fn reserve(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let accrued = now.duration_since(bucket.refreshed).as_secs_f64() * self.refill_per_sec;
        bucket.tokens = (bucket.tokens + accrued).min(self.capacity);
        bucket.refreshed = now;

        if bucket.tokens >= COST {
            bucket.tokens -= COST;
            return Ok(());
        }
        let missing = COST - bucket.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_per_sec))
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_ok()
    }

    pub async fn acquire(&self) {
        while let Err(wait) = self.reserve() {
            let wait = wait.max(Duration::from_millis(1));
            trace!(wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}
