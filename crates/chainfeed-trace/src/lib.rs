//! chainfeed-trace — one trace model for two node trace formats.
//!
//! Nodes expose execution traces in one of two shapes:
//!
//! ```text
//! trace_block                     → flat records with traceAddress/subtraces
//! debug_traceBlockByNumber        → one nested callTracer frame per transaction
//!   (tracer: "callTracer")
//! ```
//!
//! [`TraceSource`] hides the difference. The strategy is picked once from
//! [`TraceFormat`] with [`source_for`], and the rest of the pipeline only sees
//! the flat [`Trace`](chainfeed_core::Trace) list.

pub mod geth;
pub mod parity;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use chainfeed_core::{Hex, Trace, TraceFormat};

pub use geth::GethTraces;
pub use parity::ParityTraces;

/// Errors raised while normalizing a trace response.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The response does not have the expected JSON shape.
    #[error("malformed trace response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown trace type '{0}'")]
    UnknownType(String),

    #[error("unknown call type '{0}'")]
    UnknownCallType(String),
}

/// A node-specific way of requesting and decoding a block's traces.
pub trait TraceSource: Send + Sync + 'static {
    /// JSON-RPC method to request.
    fn method(&self) -> &'static str;

    /// Method parameters for the block at `height_hex`.
    fn params(&self, height_hex: &str) -> Vec<Value>;

    /// Decode the raw `result` into the flat trace list for one block.
    ///
    /// `tx_hashes` lists the block's transaction hashes in block order and
    /// is used when the response does not carry them itself.
    fn parse_traces(&self, raw: Value, tx_hashes: &[Hex]) -> Result<Vec<Trace>, TraceError>;
}

/// Build the strategy for a configured trace format.
pub fn source_for(format: TraceFormat) -> Arc<dyn TraceSource> {
    match format {
        TraceFormat::Parity => Arc::new(ParityTraces),
        TraceFormat::Geth => Arc::new(GethTraces),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_for_selects_method() {
        assert_eq!(source_for(TraceFormat::Parity).method(), "trace_block");
        assert_eq!(
            source_for(TraceFormat::Geth).method(),
            "debug_traceBlockByNumber"
        );
    }
}
