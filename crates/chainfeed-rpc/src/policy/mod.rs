//! Request policies: token bucket rate limiting and exponential backoff.

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
