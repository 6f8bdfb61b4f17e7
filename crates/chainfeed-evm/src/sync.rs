//! Sync driver — decides which heights to fetch and when.
//!
//! # Catch-up
//! Loop: wait on the rollback barrier, read the head, update the fetcher
//! mode, dispatch every height above the highest one already dispatched.
//! Once nothing new remains and the fetcher is live (or the cursor reached
//! the head), catch-up ends. Errors are fatal.
//!
//! # Live
//! With a head stream: each `newHeads` notification dispatches up to the
//! announced head. Malformed messages are skipped; a read error or the end
//! of the stream is fatal.
//!
//! # Polling
//! Without a head stream: every `poll_interval` dispatch up to the current
//! head. Errors are logged and retried on the next tick.
//!
//! The barrier is awaited before every stream read and again right before
//! every dispatch, so a rollback holding it has the cursor to itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainfeed_core::SharedCursor;
use chainfeed_rpc::{parse_new_head, HeadStream};

use crate::error::IngestError;
use crate::fetcher::{BlockFetcher, EvmRpcClient};

// ─── Rollback barrier ─────────────────────────────────────────────────────────

/// Blocks the driver while a rollback owns the cursor.
///
/// `wait` returns once the barrier is released. A barrier that is never
/// released blocks the driver until it is canceled.
#[async_trait]
pub trait RollbackBarrier: Send + Sync + 'static {
    async fn wait(&self);
}

/// A `watch`-backed barrier that starts released.
#[derive(Debug)]
pub struct PauseGate {
    paused: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RollbackBarrier for PauseGate {
    async fn wait(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so `wait_for` only returns once resumed.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyncTiming {
    pub poll_interval: Duration,
    pub idle_delay: Duration,
}

pub struct SyncDriver {
    state: DriverState,
    heads: Option<Box<dyn HeadStream>>,
}

struct DriverState {
    client: Arc<dyn EvmRpcClient>,
    fetcher: BlockFetcher,
    cursor: SharedCursor,
    barrier: Arc<dyn RollbackBarrier>,
    timing: SyncTiming,
    /// Highest height handed to the fetcher so far.
    dispatched: u64,
}

impl SyncDriver {
    /// The mode is fixed here: with `heads` the driver follows the stream
    /// after catch-up, without it the driver polls.
    pub fn new(
        client: Arc<dyn EvmRpcClient>,
        fetcher: BlockFetcher,
        cursor: SharedCursor,
        barrier: Arc<dyn RollbackBarrier>,
        heads: Option<Box<dyn HeadStream>>,
        timing: SyncTiming,
    ) -> Self {
        let dispatched = cursor.height();
        Self {
            state: DriverState {
                client,
                fetcher,
                cursor,
                barrier,
                timing,
                dispatched,
            },
            heads,
        }
    }

    /// Run until canceled (`Ok`) or a fatal error.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), IngestError> {
        let Self { mut state, heads } = self;
        let result = async {
            state.catch_up(&cancel).await?;
            match heads {
                Some(stream) => state.follow(stream, &cancel).await,
                None => state.poll(&cancel).await,
            }
        }
        .await;

        match result {
            Err(e) if e.is_cancellation() || cancel.is_cancelled() => {
                debug!(error = %e, "sync driver stopped by cancellation");
                Ok(())
            }
            other => other,
        }
    }
}

impl DriverState {
    async fn catch_up(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        info!(from = self.dispatched + 1, "catching up");
        loop {
            self.wait_barrier(cancel).await?;
            let head = self.client.head(cancel).await?;
            let cursor = self.cursor.height();
            let live = self.fetcher.update_mode(head, cursor);

            if head <= self.dispatched {
                if live || cursor >= head {
                    info!(head, cursor, "caught up");
                    return Ok(());
                }
                sleep(self.timing.idle_delay, cancel).await?;
                continue;
            }
            self.dispatch_to(head, cancel).await?;
        }
    }

    async fn follow(
        &mut self,
        mut stream: Box<dyn HeadStream>,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        info!("following newHeads");
        loop {
            self.wait_barrier(cancel).await?;
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Canceled),
                msg = stream.next_message() => msg?,
            };
            let head = match parse_new_head(&message) {
                Ok(Some(head)) => head,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "skipping malformed head notification");
                    continue;
                }
            };
            self.fetcher.update_mode(head, self.cursor.height());
            self.dispatch_to(head, cancel).await?;
        }
    }

    async fn poll(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        info!(interval_ms = self.timing.poll_interval.as_millis() as u64, "polling for heads");
        let mut ticker = tokio::time::interval(self.timing.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Canceled),
                _ = ticker.tick() => {}
            }
            self.wait_barrier(cancel).await?;
            match self.poll_once(cancel).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e @ IngestError::ChannelClosed { .. }) => return Err(e),
                Err(e) => warn!(error = %e, "poll tick failed, retrying next tick"),
            }
        }
    }

    async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        let head = self.client.head(cancel).await?;
        self.fetcher.update_mode(head, self.cursor.height());
        self.dispatch_to(head, cancel).await
    }

    /// Fetch `dispatched + 1 ..= head`. On failure `dispatched` stays put so
    /// the range is dispatched again; the sequencer discards duplicates.
    ///
    /// The barrier is checked again here: a pause may have started while the
    /// caller was blocked reading the head.
    async fn dispatch_to(&mut self, head: u64, cancel: &CancellationToken) -> Result<(), IngestError> {
        if head <= self.dispatched {
            return Ok(());
        }
        self.wait_barrier(cancel).await?;
        let from = self.dispatched + 1;
        debug!(from, to = head, live = self.fetcher.is_live(), "dispatching");
        self.fetcher.fetch_range(from, head, cancel).await?;
        self.dispatched = head;
        Ok(())
    }

    async fn wait_barrier(&self, cancel: &CancellationToken) -> Result<(), IngestError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Canceled),
            _ = self.barrier.wait() => Ok(()),
        }
    }
}

async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), IngestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Canceled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
