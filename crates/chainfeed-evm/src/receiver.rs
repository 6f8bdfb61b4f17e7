//! Receiver — owns the cursor and the lifecycle of the pipeline tasks.
//!
//! ```text
//!  SyncDriver ──► BlockFetcher ──(mpsc, channel_size)──► Sequencer ──► blocks
//!      │                                                     │
//!      └─ genesis handoff (start_height == 0) ──► genesis    └─► SharedCursor
//! ```
//!
//! Both tasks run under one root [`CancellationToken`]. The first task to
//! fail with a real error cancels the root token, which stops the other one.
//! [`Receiver::close`] cancels, joins every task, and reports that failure.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use chainfeed_core::{BlockUnit, Hex, ReceiverConfig, SharedCursor};
use chainfeed_rpc::{HeadStream, RetryPolicy};

use crate::error::IngestError;
use crate::fetcher::{BlockFetcher, EvmRpcClient, FetcherConfig};
use crate::genesis::{hand_off, load_genesis, GenesisHandoff};
use crate::sequencer::Sequencer;
use crate::sync::{RollbackBarrier, SyncDriver, SyncTiming};

/// The receiving ends handed to the downstream consumer.
#[derive(Debug)]
pub struct ReceiverOutputs {
    /// Block Units in strict, gapless height order.
    pub blocks: mpsc::Receiver<BlockUnit>,
    /// At most one genesis handoff, only when starting from height zero.
    pub genesis: mpsc::Receiver<GenesisHandoff>,
}

type FailureSlot = Arc<Mutex<Option<IngestError>>>;

pub struct Receiver {
    cursor: SharedCursor,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    failure: FailureSlot,
}

impl Receiver {
    /// Validate `config`, then spawn the sequencer and the sync driver.
    ///
    /// Must be called from within a Tokio runtime. When `start_height` is 0
    /// the driver first hands the genesis record to the consumer and waits
    /// for its acknowledgement, so the consumer should drain
    /// [`ReceiverOutputs::genesis`] before expecting blocks.
    pub fn start(
        config: &ReceiverConfig,
        client: Arc<dyn EvmRpcClient>,
        heads: Option<Box<dyn HeadStream>>,
        barrier: Arc<dyn RollbackBarrier>,
    ) -> Result<(Self, ReceiverOutputs), IngestError> {
        config.validate()?;

        let cursor = SharedCursor::at(config.start_height);
        let cancel = CancellationToken::new();
        let failure: FailureSlot = Arc::default();

        let (fetch_tx, fetch_rx) = mpsc::channel(config.channel_size);
        let (block_tx, block_rx) = mpsc::channel(config.channel_size);
        let (genesis_tx, genesis_rx) = mpsc::channel(1);

        let fetcher = BlockFetcher::new(
            client.clone(),
            fetch_tx.clone(),
            FetcherConfig::from(config),
            RetryPolicy::new(config.retry.clone()),
        );
        let driver = SyncDriver::new(
            client,
            fetcher,
            cursor.clone(),
            barrier,
            heads,
            SyncTiming {
                poll_interval: config.poll_interval(),
                idle_delay: config.idle_delay(),
            },
        );
        let sequencer = Sequencer::new(fetch_rx, block_tx, cursor.clone());

        let genesis_path = (config.start_height == 0).then(|| config.genesis_path());
        let sync_cancel = cancel.clone();
        // Keeps the sequencer input open until the root token is canceled, so
        // a sync failure is never reported as a closed channel.
        let fetch_guard = fetch_tx;
        let sync_task = async move {
            let result = async {
                if let Some(path) = genesis_path {
                    info!(path = %path.display(), "starting from genesis");
                    let genesis = load_genesis(&path).await?;
                    match hand_off(genesis, &genesis_tx, &sync_cancel).await {
                        Err(e) if e.is_cancellation() => return Ok(()),
                        other => other?,
                    }
                    info!("genesis acknowledged");
                }
                drop(genesis_tx);
                driver.run(sync_cancel.clone()).await
            }
            .await;
            if result.is_err() {
                sync_cancel.cancel();
            }
            drop(fetch_guard);
            result
        };

        let tasks = vec![
            supervise("sequencer", sequencer.run(cancel.clone()), &cancel, &failure),
            supervise("sync", sync_task, &cancel, &failure),
        ];

        info!(
            start_height = config.start_height,
            rpc = %config.rpc_url,
            ws = config.ws_url.is_some(),
            trace_format = %config.trace_format,
            capacity = config.capacity,
            "receiver started"
        );

        let receiver = Self {
            cursor,
            cancel,
            tasks,
            failure,
        };
        let outputs = ReceiverOutputs {
            blocks: block_rx,
            genesis: genesis_rx,
        };
        Ok((receiver, outputs))
    }

    /// Last emitted `(height, hash)`. Never torn.
    pub fn level(&self) -> (u64, Hex) {
        self.cursor.level()
    }

    pub fn cursor(&self) -> &SharedCursor {
        &self.cursor
    }

    /// Resolves once the receiver stops, on `close` or on a task failure.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every task, wait for all of them, and return the first
    /// non-cancellation failure, if any.
    pub async fn close(mut self) -> Result<(), IngestError> {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "receiver supervisor panicked");
            }
        }
        let (height, hash) = self.cursor.level();
        info!(height, hash = %hash, "receiver closed");

        let failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner).take();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `fut` as its own task and record its outcome. A panic or a
/// non-cancellation error is stored and stops the whole receiver.
fn supervise<F>(
    name: &'static str,
    fut: F,
    cancel: &CancellationToken,
    failure: &FailureSlot,
) -> JoinHandle<()>
where
    F: Future<Output = Result<(), IngestError>> + Send + 'static,
{
    let cancel = cancel.clone();
    let failure = failure.clone();
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        let outcome = match inner.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::Task {
                task: name,
                reason: e.to_string(),
            }),
        };
        match outcome {
            Ok(()) => debug!(task = name, "task finished"),
            Err(e) if e.is_cancellation() => debug!(task = name, "task canceled"),
            Err(e) => {
                error!(task = name, error = %e, "task failed, stopping receiver");
                failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(e);
                cancel.cancel();
            }
        }
    })
}
