//! One-time genesis handoff.
//!
//! When ingestion starts from height zero the genesis record is read from
//! `<assets_dir>/genesis.json`, published to the consumer, and the receiver
//! waits for the consumer to confirm it persisted the record.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

use chainfeed_core::Genesis;

use crate::error::IngestError;

/// The genesis record plus the acknowledgement the consumer must send once
/// it has stored it.
#[derive(Debug)]
pub struct GenesisHandoff {
    pub genesis: Genesis,
    pub ack: oneshot::Sender<()>,
}

impl GenesisHandoff {
    /// Confirm the record was persisted.
    pub fn acknowledge(self) -> Genesis {
        let _ = self.ack.send(());
        self.genesis
    }
}

pub async fn load_genesis(path: &Path) -> Result<Genesis, IngestError> {
    let raw = tokio::fs::read(path).await.map_err(|source| IngestError::GenesisRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| IngestError::GenesisDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// Publish `genesis` and wait for the acknowledgement or cancellation.
pub async fn hand_off(
    genesis: Genesis,
    out: &mpsc::Sender<GenesisHandoff>,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    let (ack, acked) = oneshot::channel();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(IngestError::Canceled),
        sent = out.send(GenesisHandoff { genesis, ack }) => sent.map_err(|_| IngestError::ChannelClosed {
            channel: "genesis output",
        })?,
    }
    info!("genesis published, waiting for acknowledgement");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Canceled),
        res = acked => res.map_err(|_| IngestError::GenesisNotAcknowledged),
    }
}
