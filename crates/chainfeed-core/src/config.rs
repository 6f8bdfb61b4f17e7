//! Receiver configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which trace format the node speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// Flat `trace_block` records (Erigon, Nethermind, OpenEthereum).
    #[default]
    Parity,
    /// Nested `debug_traceBlockByNumber` call frames (Geth, Reth debug API).
    Geth,
}

impl std::fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parity => write!(f, "parity"),
            Self::Geth => write!(f, "geth"),
        }
    }
}

/// Token bucket settings for the shared RPC rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum tokens in the bucket (burst size).
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_rate: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 50.0,
            refill_rate: 50.0,
        }
    }
}

/// Exponential backoff for retryable fetch failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Configuration for a receiver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// HTTP JSON-RPC endpoint of the node.
    pub rpc_url: String,
    /// Websocket endpoint; when set the receiver follows `newHeads`,
    /// otherwise it polls.
    pub ws_url: Option<String>,
    pub trace_format: TraceFormat,
    /// Last height already processed; the first emitted block is `start_height + 1`.
    pub start_height: u64,
    /// Heights per bulk window. A lag below this switches the fetcher to live mode.
    pub capacity: u64,
    /// Heights per JSON-RPC batch (each height costs three requests).
    pub rpc_batch_size: usize,
    /// Batches in flight at once during bulk fetches.
    pub max_concurrent_batches: usize,
    /// Bound of the fetcher → sequencer channel and of the output channel.
    pub channel_size: usize,
    /// Poll period when no websocket is configured.
    pub poll_interval_ms: u64,
    /// Pause between head checks while catching up with nothing to dispatch.
    pub idle_delay_ms: u64,
    /// Upper bound for one logical RPC call, rate limiter wait included.
    pub request_timeout_ms: u64,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimiterConfig>,
    pub retry: RetryConfig,
    /// Directory holding `genesis.json`.
    pub assets_dir: PathBuf,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            ws_url: None,
            trace_format: TraceFormat::default(),
            start_height: 0,
            capacity: 128,
            rpc_batch_size: 16,
            max_concurrent_batches: 4,
            channel_size: 1024,
            poll_interval_ms: 2000,
            idle_delay_ms: 500,
            request_timeout_ms: 30_000,
            rate_limit: None,
            retry: RetryConfig::default(),
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl ReceiverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.assets_dir.join("genesis.json")
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("rpc_url", &self.rpc_url, &["http", "https"])?;
        if let Some(ws) = &self.ws_url {
            check_url("ws_url", ws, &["ws", "wss"])?;
        }
        let counts = [
            ("capacity", self.capacity as usize),
            ("rpc_batch_size", self.rpc_batch_size),
            ("max_concurrent_batches", self.max_concurrent_batches),
            ("channel_size", self.channel_size),
            ("poll_interval_ms", self.poll_interval_ms as usize),
            ("request_timeout_ms", self.request_timeout_ms as usize),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if let Some(rl) = &self.rate_limit {
            if rl.capacity < 1.0 || rl.refill_rate <= 0.0 {
                return Err(ConfigError::Other(
                    "rate_limit needs capacity >= 1 and a positive refill_rate".into(),
                ));
            }
        }
        Ok(())
    }
}

fn check_url(field: &'static str, raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::InvalidUrl {
            field,
            url: raw.to_string(),
            reason: format!("expected scheme {}", schemes.join(" or ")),
        });
    }
    Ok(())
}
