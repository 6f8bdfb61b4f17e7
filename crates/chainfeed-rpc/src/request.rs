//! JSON-RPC 2.0 wire types.
//!
//! Requests are only ever built by this crate, so they carry a numeric id and
//! a `'static` method name. Responses are decoded leniently: any id shape is
//! accepted and correlation happens on the numeric ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const VERSION: &str = "2.0";

/// Outgoing request. Serializes as `{"jsonrpc":"2.0","id":..,"method":..,"params":[..]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &'static str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id,
            method,
            params,
        }
    }
}

/// Response id as echoed by the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            // Some proxies stringify numeric ids.
            Self::String(s) => s.parse().ok(),
            Self::Null => None,
        }
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RpcId,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id: RpcId::Number(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        let error = JsonRpcError {
            code,
            message: message.into(),
            data: None,
        };
        Self {
            id: RpcId::Number(id),
            result: None,
            error: Some(error),
        }
    }

    /// The node's error wins over any result; an absent result is `null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = JsonRpcRequest::new(4, "eth_getBlockByNumber", vec![json!("0x10"), json!(true)]);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "jsonrpc": "2.0", "id": 4, "method": "eth_getBlockByNumber", "params": ["0x10", true] })
        );
    }

    #[test]
    fn null_result_reads_as_null() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":null}"#).unwrap();
        assert_eq!(resp.id.as_number(), Some(7));
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn stringified_ids_still_correlate() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"id":"12","result":"0x1"}"#).unwrap();
        assert_eq!(resp.id.as_number(), Some(12));
    }

    #[test]
    fn error_object_wins() {
        let err = JsonRpcResponse::failure(1, -32000, "header not found")
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, -32000);
        assert_eq!(err.to_string(), "JSON-RPC error -32000: header not found");
    }
}
