//! The `RpcTransport` trait and its reqwest-backed HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Moves JSON-RPC payloads to a node and back.
///
/// The client layers rate limiting, timeouts and cancellation on top; a
/// transport only performs the round trip. Implementations must be
/// `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError>;

    /// Send a batch of JSON-RPC requests in one round trip. Responses may
    /// come back in any order.
    async fn send_batch(&self, reqs: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, RpcError>;

    /// The transport's endpoint.
    fn url(&self) -> &str;
}

/// HTTP POST transport; a batch is one JSON array body.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport for `url`. `request_timeout` bounds each HTTP
    /// exchange at the socket level.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|e| RpcError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;
        Ok(Self { url, http })
    }

    async fn post<B, R>(&self, body: &B) -> Result<R, RpcError>
    where
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Status { code, body });
        }

        let bytes = resp.bytes().await.map_err(|e| RpcError::Http(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RpcError::decode("json-rpc envelope", e))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        self.post(&req).await
    }

    async fn send_batch(&self, reqs: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        self.post(&reqs).await
    }

    fn url(&self) -> &str {
        &self.url
    }
}
