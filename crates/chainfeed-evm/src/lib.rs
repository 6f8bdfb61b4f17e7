//! chainfeed-evm — ordered block ingestion from an EVM node.
//!
//! # Architecture
//!
//! - [`SyncDriver`] — catch-up, then `newHeads` or polling; honors a [`RollbackBarrier`]
//! - [`BlockFetcher`] — live (one height per call) or bulk (windowed, concurrent batches)
//! - [`Sequencer`] — reorder buffer; gapless, strictly ordered output
//! - [`Receiver`] — cursor owner, task supervision, genesis handoff, shutdown
//!
//! Start one with [`ReceiverBuilder`].

pub mod builder;
pub mod error;
pub mod fetcher;
pub mod genesis;
pub mod receiver;
pub mod sequencer;
pub mod sync;

pub use builder::ReceiverBuilder;
pub use error::IngestError;
pub use fetcher::{BlockFetcher, EvmRpcClient, FetcherConfig};
pub use genesis::GenesisHandoff;
pub use receiver::{Receiver, ReceiverOutputs};
pub use sequencer::Sequencer;
pub use sync::{PauseGate, RollbackBarrier, SyncDriver, SyncTiming};
