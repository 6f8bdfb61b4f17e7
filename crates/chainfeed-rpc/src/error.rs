//! RPC error taxonomy.

use thiserror::Error;

use chainfeed_trace::TraceError;

use crate::request::JsonRpcError;

/// Errors raised by the RPC client, its transports and the head stream.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Endpoint URL could not be parsed. Raised at startup.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection refused, reset, TLS failure and the like.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx HTTP status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The node answered with a JSON-RPC error object.
    #[error("{method} failed{}: {error}", .height.map(|h| format!(" at height {h}")).unwrap_or_default())]
    Rpc {
        method: String,
        height: Option<u64>,
        error: JsonRpcError,
    },

    /// The logical call did not finish within the configured timeout.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The caller's cancellation token fired.
    #[error("request canceled")]
    Canceled,

    /// A response did not have the expected shape.
    #[error("cannot decode {method} response: {reason}")]
    Decode { method: String, reason: String },

    /// A batch response lacked an entry for a request id.
    #[error("batch response is missing id {id}")]
    MissingResponse { id: u64 },

    /// `eth_getBlockByNumber` returned `null`.
    #[error("block {height} not found")]
    BlockNotFound { height: u64 },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("cannot normalize traces for block {height}: {source}")]
    Trace {
        height: u64,
        #[source]
        source: TraceError,
    },
}

impl RpcError {
    pub(crate) fn decode(method: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            method: method.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Status { .. }
                | Self::Timeout { .. }
                | Self::WebSocket(_)
                | Self::MissingResponse { .. }
                | Self::BlockNotFound { .. }
        )
    }

    /// Returns `true` if the call stopped because it was canceled.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(RpcError::Http("connection reset".into()).is_retryable());
        assert!(RpcError::Status { code: 502, body: String::new() }.is_retryable());
        assert!(RpcError::Timeout { ms: 10 }.is_retryable());
        assert!(!RpcError::Canceled.is_retryable());
        assert!(!RpcError::decode("eth_blockNumber", "not a quantity").is_retryable());
        assert!(RpcError::Canceled.is_cancellation());
    }

    #[test]
    fn rpc_error_names_method_and_height() {
        let err = RpcError::Rpc {
            method: "trace_block".into(),
            height: Some(12),
            error: JsonRpcError {
                code: -32601,
                message: "method not found".into(),
                data: None,
            },
        };
        assert_eq!(
            err.to_string(),
            "trace_block failed at height 12: JSON-RPC error -32601: method not found"
        );
    }
}
