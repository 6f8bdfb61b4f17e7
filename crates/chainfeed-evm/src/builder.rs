//! Fluent builder for starting a receiver.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainfeed_core::TraceFormat;
//! use chainfeed_evm::ReceiverBuilder;
//!
//! # async fn run() -> Result<(), chainfeed_evm::IngestError> {
//! let (receiver, mut outputs) = ReceiverBuilder::new()
//!     .rpc_url("http://127.0.0.1:8545")
//!     .ws_url("ws://127.0.0.1:8546")
//!     .trace_format(TraceFormat::Geth)
//!     .start_height(19_000_000)
//!     .capacity(256)
//!     .start()
//!     .await?;
//!
//! while let Some(unit) = outputs.blocks.recv().await {
//!     println!("block {} {}", unit.height, unit.hash());
//! }
//! receiver.close().await
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chainfeed_core::{RateLimiterConfig, ReceiverConfig, RetryConfig, TraceFormat};
use chainfeed_rpc::{HeadStream, RpcClient, WsNewHeads};

use crate::error::IngestError;
use crate::fetcher::EvmRpcClient;
use crate::receiver::{Receiver, ReceiverOutputs};
use crate::sync::{PauseGate, RollbackBarrier};

/// Fluent builder for [`ReceiverConfig`] and its collaborators.
#[derive(Default)]
pub struct ReceiverBuilder {
    config: ReceiverConfig,
    client: Option<Arc<dyn EvmRpcClient>>,
    heads: Option<Box<dyn HeadStream>>,
    barrier: Option<Arc<dyn RollbackBarrier>>,
}

impl ReceiverBuilder {
    /// Builder over [`ReceiverConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ReceiverConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// HTTP JSON-RPC endpoint of the node.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    /// Follow `newHeads` on this websocket after catch-up instead of polling.
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = Some(url.into());
        self
    }

    /// Trace format the node serves (`trace_block` or `callTracer`).
    pub fn trace_format(mut self, format: TraceFormat) -> Self {
        self.config.trace_format = format;
        self
    }

    /// Last height already processed. 0 starts with the genesis handoff.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// Heights per bulk window; a smaller lag switches to live fetching.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Heights per JSON-RPC batch.
    pub fn rpc_batch_size(mut self, size: usize) -> Self {
        self.config.rpc_batch_size = size;
        self
    }

    /// Batches in flight at once during bulk fetches.
    pub fn max_concurrent_batches(mut self, n: usize) -> Self {
        self.config.max_concurrent_batches = n;
        self
    }

    /// Bound of the internal and output block channels.
    pub fn channel_size(mut self, size: usize) -> Self {
        self.config.channel_size = size;
        self
    }

    /// Head poll period when no websocket is configured.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Pause between head checks while catching up with nothing to fetch.
    pub fn idle_delay_ms(mut self, ms: u64) -> Self {
        self.config.idle_delay_ms = ms;
        self
    }

    /// Upper bound for one RPC call, rate limiter wait included.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Enable the shared token bucket: `capacity` burst, `refill_rate` tokens per second.
    pub fn rate_limit(mut self, capacity: f64, refill_rate: f64) -> Self {
        self.config.rate_limit = Some(RateLimiterConfig {
            capacity,
            refill_rate,
        });
        self
    }

    /// Backoff for retryable fetch failures.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Directory holding `genesis.json`.
    pub fn assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.assets_dir = dir.into();
        self
    }

    /// Use this client instead of an HTTP client built from `rpc_url`.
    pub fn client(mut self, client: Arc<dyn EvmRpcClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use this head stream instead of subscribing on `ws_url`.
    pub fn heads(mut self, heads: Box<dyn HeadStream>) -> Self {
        self.heads = Some(heads);
        self
    }

    /// Rollback barrier; defaults to an always-released [`PauseGate`].
    pub fn barrier(mut self, barrier: Arc<dyn RollbackBarrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Return the assembled configuration without starting anything.
    pub fn build_config(self) -> ReceiverConfig {
        self.config
    }

    /// Build the missing collaborators and start the receiver.
    pub async fn start(self) -> Result<(Receiver, ReceiverOutputs), IngestError> {
        let Self {
            config,
            client,
            heads,
            barrier,
        } = self;
        config.validate()?;

        let client: Arc<dyn EvmRpcClient> = match client {
            Some(client) => client,
            None => Arc::new(RpcClient::from_config(&config)?),
        };
        let heads: Option<Box<dyn HeadStream>> = match (heads, &config.ws_url) {
            (Some(heads), _) => Some(heads),
            (None, Some(url)) => Some(Box::new(WsNewHeads::subscribe(url.clone()).await?)),
            (None, None) => None,
        };
        let barrier = barrier.unwrap_or_else(|| Arc::new(PauseGate::new()));

        Receiver::start(&config, client, heads, barrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = ReceiverBuilder::new().build_config();
        assert_eq!(cfg, ReceiverConfig::default());
    }

    #[test]
    fn builder_custom() {
        let cfg = ReceiverBuilder::new()
            .rpc_url("https://node.example")
            .ws_url("wss://node.example/ws")
            .trace_format(TraceFormat::Geth)
            .start_height(100)
            .capacity(64)
            .rpc_batch_size(8)
            .rate_limit(20.0, 10.0)
            .build_config();

        assert_eq!(cfg.rpc_url, "https://node.example");
        assert_eq!(cfg.ws_url.as_deref(), Some("wss://node.example/ws"));
        assert_eq!(cfg.trace_format, TraceFormat::Geth);
        assert_eq!(cfg.start_height, 100);
        assert_eq!(cfg.capacity, 64);
        assert_eq!(cfg.rpc_batch_size, 8);
        assert_eq!(cfg.rate_limit.as_ref().unwrap().capacity, 20.0);
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn invalid_config_does_not_start() {
        let err = ReceiverBuilder::new().channel_size(0).start().await.err().unwrap();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
