//! `RpcClient` — the node operations the pipeline needs.
//!
//! Every operation takes a [`CancellationToken`] and runs as one logical
//! call: wait for a rate limiter token, then one HTTP round trip. The whole
//! call (limiter wait included) is bounded by the client timeout. A canceled
//! token wins over everything else; if it fires before the limiter grants a
//! token, no request leaves the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use chainfeed_core::{Block, BlockUnit, Hex, Receipt, ReceiverConfig};
use chainfeed_trace::{source_for, TraceSource};

use crate::error::RpcError;
use crate::policy::RateLimiter;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HttpTransport, RpcTransport};

const GET_BLOCK: &str = "eth_getBlockByNumber";
const GET_RECEIPTS: &str = "eth_getBlockReceipts";

/// One `eth_getStorageAt` lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub address: Hex,
    pub slot: Hex,
    pub height: u64,
}

/// One `eth_call`. `height: None` runs against `latest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub to: Hex,
    pub data: Hex,
    pub height: Option<u64>,
}

/// Rate-limited, cancellable JSON-RPC client.
pub struct RpcClient<T: RpcTransport> {
    transport: T,
    traces: Arc<dyn TraceSource>,
    limiter: Option<Arc<RateLimiter>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient<HttpTransport> {
    /// HTTP client wired from the receiver configuration.
    pub fn from_config(config: &ReceiverConfig) -> Result<Self, RpcError> {
        let transport = HttpTransport::new(config.rpc_url.clone(), config.request_timeout())?;
        let mut client = Self::new(transport, source_for(config.trace_format))
            .with_timeout(config.request_timeout());
        if let Some(rl) = &config.rate_limit {
            client = client.with_rate_limiter(Arc::new(RateLimiter::new(rl.clone())));
        }
        Ok(client)
    }
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn new(transport: T, traces: Arc<dyn TraceSource>) -> Self {
        Self {
            transport,
            traces,
            limiter: None,
            timeout: Duration::from_secs(30),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub fn trace_source(&self) -> &Arc<dyn TraceSource> {
        &self.traces
    }

    // ─── Operations ───────────────────────────────────────────────────────────

    /// Current chain head (`eth_blockNumber`).
    pub async fn head(&self, cancel: &CancellationToken) -> Result<u64, RpcError> {
        let raw = self.request("eth_blockNumber", vec![], None, cancel).await?;
        quantity_from_value("eth_blockNumber", &raw)
    }

    /// One block with full transactions.
    pub async fn block(&self, height: u64, cancel: &CancellationToken) -> Result<Block, RpcError> {
        let raw = self
            .request(GET_BLOCK, vec![json!(quantity(height)), json!(true)], Some(height), cancel)
            .await?;
        decode_block(height, raw)
    }

    /// Block, receipts and traces for every height in one batched round trip.
    ///
    /// Height `heights[i]` uses request ids `3i` (block), `3i + 1` (traces)
    /// and `3i + 2` (receipts). Any error in any sub-response fails the whole
    /// call; there are no partial results.
    pub async fn block_bulk(
        &self,
        heights: &[u64],
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockUnit>, RpcError> {
        if heights.is_empty() {
            return Ok(vec![]);
        }

        let trace_method = self.traces.method();
        let mut reqs = Vec::with_capacity(heights.len() * 3);
        for (i, &height) in heights.iter().enumerate() {
            let tag = quantity(height);
            let base = (i * 3) as u64;
            reqs.push(JsonRpcRequest::new(base, GET_BLOCK, vec![json!(tag), json!(true)]));
            reqs.push(JsonRpcRequest::new(base + 1, trace_method, self.traces.params(&tag)));
            reqs.push(JsonRpcRequest::new(base + 2, GET_RECEIPTS, vec![json!(tag)]));
        }

        let responses = self.dispatch(cancel, self.transport.send_batch(reqs)).await?;
        let mut by_id = index_by_id(responses);

        let mut units = Vec::with_capacity(heights.len());
        for (i, &height) in heights.iter().enumerate() {
            let base = (i * 3) as u64;
            let block = decode_block(height, take_result(&mut by_id, base, GET_BLOCK, height)?)?;

            let traces_raw = take_result(&mut by_id, base + 1, trace_method, height)?;
            let traces = self
                .traces
                .parse_traces(traces_raw, &block.tx_hashes())
                .map_err(|source| RpcError::Trace { height, source })?;

            let receipts_raw = take_result(&mut by_id, base + 2, GET_RECEIPTS, height)?;
            let receipts: Vec<Receipt> = if receipts_raw.is_null() {
                vec![]
            } else {
                serde_json::from_value(receipts_raw).map_err(|e| RpcError::decode(GET_RECEIPTS, e))?
            };

            units.push(BlockUnit {
                height,
                block,
                receipts,
                traces,
            });
        }
        Ok(units)
    }

    /// Batched storage reads; values come back in request order.
    pub async fn storage(
        &self,
        requests: &[StorageRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<Hex>, RpcError> {
        const METHOD: &str = "eth_getStorageAt";
        if requests.is_empty() {
            return Ok(vec![]);
        }
        let reqs = requests
            .iter()
            .enumerate()
            .map(|(i, r)| {
                JsonRpcRequest::new(
                    i as u64,
                    METHOD,
                    vec![json!(r.address), json!(r.slot), json!(quantity(r.height))],
                )
            })
            .collect();

        let responses = self.dispatch(cancel, self.transport.send_batch(reqs)).await?;
        let mut by_id = index_by_id(responses);
        requests
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let raw = take_result(&mut by_id, i as u64, METHOD, r.height)?;
                serde_json::from_value::<Hex>(raw).map_err(|e| RpcError::decode(METHOD, e))
            })
            .collect()
    }

    /// Read-only contract call.
    pub async fn call(&self, request: &CallRequest, cancel: &CancellationToken) -> Result<Hex, RpcError> {
        const METHOD: &str = "eth_call";
        let tag = request
            .height
            .map(quantity)
            .unwrap_or_else(|| "latest".to_string());
        let params = vec![json!({ "to": request.to, "data": request.data }), json!(tag)];
        let raw = self.request(METHOD, params, request.height, cancel).await?;
        serde_json::from_value(raw).map_err(|e| RpcError::decode(METHOD, e))
    }

    // ─── Internals ────────────────────────────────────────────────────────────

    async fn request(
        &self,
        method: &'static str,
        params: Vec<Value>,
        height: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self.dispatch(cancel, self.transport.send(req)).await?;
        resp.into_result().map_err(|error| RpcError::Rpc {
            method: method.to_string(),
            height,
            error,
        })
    }

    /// Limiter wait plus `send`, under the timeout and the cancellation token.
    /// `send` is not polled until a token has been granted.
    async fn dispatch<R, F>(&self, cancel: &CancellationToken, send: F) -> Result<R, RpcError>
    where
        F: Future<Output = Result<R, RpcError>>,
    {
        let work = async {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }
            send.await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Canceled),
            res = tokio::time::timeout(self.timeout, work) => match res {
                Ok(inner) => inner,
                Err(_) => Err(RpcError::Timeout { ms: self.timeout.as_millis() as u64 }),
            },
        }
    }
}

/// `0x`-prefixed minimal hex quantity, as block tags are written on the wire.
pub fn quantity(height: u64) -> String {
    format!("{height:#x}")
}

fn quantity_from_value(method: &str, raw: &Value) -> Result<u64, RpcError> {
    let s = raw
        .as_str()
        .ok_or_else(|| RpcError::decode(method, format!("expected hex string, got {raw}")))?;
    let value = Hex::parse(s).map_err(|e| RpcError::decode(method, e))?;
    if value.is_empty() {
        return Err(RpcError::decode(method, format!("empty quantity {s:?}")));
    }
    value.to_u64().map_err(|e| RpcError::decode(method, e))
}

fn decode_block(height: u64, raw: Value) -> Result<Block, RpcError> {
    if raw.is_null() {
        return Err(RpcError::BlockNotFound { height });
    }
    serde_json::from_value(raw).map_err(|e| RpcError::decode(GET_BLOCK, e))
}

fn index_by_id(responses: Vec<JsonRpcResponse>) -> HashMap<u64, JsonRpcResponse> {
    responses
        .into_iter()
        .filter_map(|r| r.id.as_number().map(|id| (id, r)))
        .collect()
}

fn take_result(
    by_id: &mut HashMap<u64, JsonRpcResponse>,
    id: u64,
    method: &str,
    height: u64,
) -> Result<Value, RpcError> {
    let resp = by_id.remove(&id).ok_or(RpcError::MissingResponse { id })?;
    resp.into_result().map_err(|error| RpcError::Rpc {
        method: method.to_string(),
        height: Some(height),
        error,
    })
}
