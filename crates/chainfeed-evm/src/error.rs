//! Error types for the ingestion pipeline.

use std::path::PathBuf;

use thiserror::Error;

use chainfeed_core::ConfigError;
use chainfeed_rpc::RpcError;

/// Errors that stop a pipeline task.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A pipeline channel closed while a task still needed it.
    #[error("{channel} channel closed")]
    ChannelClosed { channel: &'static str },

    #[error("cannot read genesis file {path}: {source}")]
    GenesisRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode genesis file {path}: {source}")]
    GenesisDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The genesis consumer dropped the acknowledgement without sending it.
    #[error("genesis handoff was not acknowledged")]
    GenesisNotAcknowledged,

    /// A supervised task panicked or was aborted.
    #[error("task '{task}' failed: {reason}")]
    Task { task: &'static str, reason: String },

    #[error("canceled")]
    Canceled,
}

impl IngestError {
    /// Returns `true` if the error only reports a shutdown in progress.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Canceled => true,
            Self::Rpc(e) => e.is_cancellation(),
            _ => false,
        }
    }
}
