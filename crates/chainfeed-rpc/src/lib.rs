//! chainfeed-rpc — JSON-RPC access to an EVM node.
//!
//! # Layers
//!
//! ```text
//! RpcClient<T>          head / block / block_bulk / storage / call
//!   ├─ RateLimiter      token bucket shared by every call
//!   ├─ TraceSource      trace method + normalizer (chainfeed-trace)
//!   └─ T: RpcTransport  HttpTransport (reqwest) or a test double
//!
//! WsNewHeads            eth_subscribe("newHeads") as a HeadStream
//! ```

pub mod client;
pub mod error;
pub mod policy;
pub mod request;
pub mod transport;
pub mod ws;

pub use client::{quantity, CallRequest, RpcClient, StorageRequest};
pub use error::RpcError;
pub use policy::{RateLimiter, RetryPolicy};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{HttpTransport, RpcTransport};
pub use ws::{parse_new_head, HeadStream, WsNewHeads};
