//! Block fetch worker.
//!
//! Fetches Block Units for a height range and publishes them on the bounded
//! sequencer channel. Near the tip (live mode) heights go one request at a
//! time; far behind (bulk mode) the range is walked in windows of `capacity`
//! heights, each window split into `rpc_batch_size` batches fetched
//! concurrently. Bulk units may be published out of order; the sequencer
//! restores it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainfeed_core::{BlockUnit, ReceiverConfig};
use chainfeed_rpc::{RetryPolicy, RpcClient, RpcError, RpcTransport};

use crate::error::IngestError;

/// The node operations the pipeline depends on.
#[async_trait]
pub trait EvmRpcClient: Send + Sync + 'static {
    async fn head(&self, cancel: &CancellationToken) -> Result<u64, RpcError>;

    async fn block_bulk(
        &self,
        heights: &[u64],
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockUnit>, RpcError>;
}

#[async_trait]
impl<T: RpcTransport> EvmRpcClient for RpcClient<T> {
    async fn head(&self, cancel: &CancellationToken) -> Result<u64, RpcError> {
        RpcClient::head(self, cancel).await
    }

    async fn block_bulk(
        &self,
        heights: &[u64],
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockUnit>, RpcError> {
        RpcClient::block_bulk(self, heights, cancel).await
    }
}

/// Batch sizing for the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Heights per bulk window; also the live/bulk lag threshold.
    pub capacity: u64,
    pub rpc_batch_size: usize,
    pub max_concurrent_batches: usize,
}

impl From<&ReceiverConfig> for FetcherConfig {
    fn from(cfg: &ReceiverConfig) -> Self {
        Self {
            capacity: cfg.capacity,
            rpc_batch_size: cfg.rpc_batch_size,
            max_concurrent_batches: cfg.max_concurrent_batches,
        }
    }
}

/// Fetches heights and publishes them to the sequencer.
pub struct BlockFetcher {
    client: Arc<dyn EvmRpcClient>,
    out: mpsc::Sender<BlockUnit>,
    config: FetcherConfig,
    retry: RetryPolicy,
    live: AtomicBool,
}

impl BlockFetcher {
    pub fn new(
        client: Arc<dyn EvmRpcClient>,
        out: mpsc::Sender<BlockUnit>,
        config: FetcherConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            out,
            config,
            retry,
            live: AtomicBool::new(false),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Recompute the mode from the distance between head and cursor:
    /// `head - cursor < capacity` is live. Returns the new mode.
    pub fn update_mode(&self, head: u64, cursor: u64) -> bool {
        let live = head.saturating_sub(cursor) < self.config.capacity;
        let was = self.live.swap(live, Ordering::AcqRel);
        if was != live {
            info!(head, cursor, live, "fetcher mode changed");
        }
        live
    }

    /// Fetch and publish every height in `from..=to`.
    pub async fn fetch_range(
        &self,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        if to < from {
            return Ok(());
        }
        if self.is_live() {
            for height in from..=to {
                let units = self.fetch_with_retry(vec![height], cancel).await?;
                self.publish(units, cancel).await?;
            }
            return Ok(());
        }

        let window = self.config.capacity.max(1);
        let batch = self.config.rpc_batch_size.max(1) as u64;
        let mut start = from;
        while start <= to {
            let end = to.min(start.saturating_add(window - 1));
            let batches: Vec<Vec<u64>> = chunked(start, end, batch);
            debug!(from = start, to = end, batches = batches.len(), "bulk window");

            let mut in_flight = stream::iter(batches)
                .map(|heights| self.fetch_with_retry(heights, cancel))
                .buffer_unordered(self.config.max_concurrent_batches.max(1));
            while let Some(units) = in_flight.next().await {
                self.publish(units?, cancel).await?;
            }

            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(())
    }

    async fn fetch_with_retry(
        &self,
        heights: Vec<u64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockUnit>, IngestError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.block_bulk(&heights, cancel).await {
                Ok(units) => return Ok(units),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            from = heights.first().copied(),
                            to = heights.last().copied(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying block fetch"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(IngestError::Canceled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send units downstream, waiting under backpressure. Never drops.
    async fn publish(
        &self,
        units: Vec<BlockUnit>,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        for unit in units {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Canceled),
                sent = self.out.send(unit) => sent.map_err(|_| IngestError::ChannelClosed {
                    channel: "fetcher output",
                })?,
            }
        }
        Ok(())
    }
}

fn chunked(from: u64, to: u64, size: u64) -> Vec<Vec<u64>> {
    let mut out = Vec::new();
    let mut start = from;
    loop {
        let end = to.min(start.saturating_add(size - 1));
        out.push((start..=end).collect());
        if end >= to {
            return out;
        }
        start = end + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chainfeed_core::{Block, Hex, RetryConfig};

    /// Client serving any height, recording every `block_bulk` call.
    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<Vec<u64>>>,
        fail_first: Mutex<u32>,
    }

    #[async_trait]
    impl EvmRpcClient for RecordingClient {
        async fn head(&self, _cancel: &CancellationToken) -> Result<u64, RpcError> {
            Ok(0)
        }

        async fn block_bulk(
            &self,
            heights: &[u64],
            _cancel: &CancellationToken,
        ) -> Result<Vec<BlockUnit>, RpcError> {
            self.calls.lock().unwrap().push(heights.to_vec());
            {
                let mut fail = self.fail_first.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(RpcError::Status { code: 503, body: String::new() });
                }
            }
            Ok(heights.iter().map(|&h| unit(h)).collect())
        }
    }

    fn unit(height: u64) -> BlockUnit {
        BlockUnit {
            height,
            block: Block {
                number: Hex::from_u64(height),
                ..Default::default()
            },
            receipts: vec![],
            traces: vec![],
        }
    }

    fn fetcher(client: Arc<RecordingClient>, capacity: u64) -> (BlockFetcher, mpsc::Receiver<BlockUnit>) {
        let (tx, rx) = mpsc::channel(1024);
        let config = FetcherConfig {
            capacity,
            rpc_batch_size: 4,
            max_concurrent_batches: 2,
        };
        let retry = RetryPolicy::new(RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            multiplier: 2.0,
        });
        (BlockFetcher::new(client, tx, config, retry), rx)
    }

    #[test]
    fn live_boundary_is_strictly_below_capacity() {
        let (f, _rx) = fetcher(Arc::default(), 128);
        assert!(f.update_mode(1127, 1000), "lag 127 is live");
        assert!(!f.update_mode(1128, 1000), "lag 128 is bulk");
        assert!(f.update_mode(5, 9), "cursor ahead of head is live");
    }

    #[test]
    fn chunks_cover_range() {
        assert_eq!(chunked(1, 10, 4), vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10]]);
        assert_eq!(chunked(7, 7, 4), vec![vec![7]]);
    }

    #[tokio::test]
    async fn bulk_mode_batches_by_window() {
        let client = Arc::new(RecordingClient::default());
        let (f, mut rx) = fetcher(client.clone(), 8);
        f.update_mode(1000, 0);
        f.fetch_range(1, 10, &CancellationToken::new()).await.unwrap();

        let mut calls = client.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10]],
            "windows of 8 split into batches of 4"
        );

        let mut got = Vec::new();
        while let Ok(u) = rx.try_recv() {
            got.push(u.height);
        }
        got.sort();
        assert_eq!(got, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn live_mode_fetches_one_height_per_call() {
        let client = Arc::new(RecordingClient::default());
        let (f, mut rx) = fetcher(client.clone(), 128);
        f.update_mode(12, 10);
        f.fetch_range(11, 12, &CancellationToken::new()).await.unwrap();
        assert_eq!(*client.calls.lock().unwrap(), vec![vec![11], vec![12]]);
        assert_eq!(rx.recv().await.unwrap().height, 11);
        assert_eq!(rx.recv().await.unwrap().height, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried() {
        let client = Arc::new(RecordingClient {
            fail_first: Mutex::new(2),
            ..Default::default()
        });
        let (f, mut rx) = fetcher(client.clone(), 128);
        f.update_mode(5, 4);
        f.fetch_range(5, 5, &CancellationToken::new()).await.unwrap();
        assert_eq!(client.calls.lock().unwrap().len(), 3);
        assert_eq!(rx.recv().await.unwrap().height, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_error() {
        let client = Arc::new(RecordingClient {
            fail_first: Mutex::new(10),
            ..Default::default()
        });
        let (f, _rx) = fetcher(client.clone(), 128);
        f.update_mode(5, 4);
        let err = f.fetch_range(5, 5, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Rpc(RpcError::Status { code: 503, .. })));
        assert_eq!(client.calls.lock().unwrap().len(), 3, "first try plus two retries");
    }

    #[tokio::test]
    async fn closed_output_is_reported() {
        let client = Arc::new(RecordingClient::default());
        let (f, rx) = fetcher(client, 128);
        drop(rx);
        f.update_mode(1, 0);
        let err = f.fetch_range(1, 1, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::ChannelClosed { .. }));
    }
}
