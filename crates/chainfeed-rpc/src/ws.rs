//! `newHeads` subscription over a websocket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use chainfeed_core::Hex;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

const SUBSCRIBE_ID: u64 = 1;

/// A stream of raw head notification payloads.
///
/// `next_message` yields the text of each message after the subscription is
/// established. A closed stream or a read failure is an error; the consumer
/// treats it as fatal.
#[async_trait]
pub trait HeadStream: Send + 'static {
    async fn next_message(&mut self) -> Result<String, RpcError>;
}

/// Test and embedding helper: any channel of payloads is a head stream.
#[async_trait]
impl HeadStream for mpsc::Receiver<Result<String, RpcError>> {
    async fn next_message(&mut self) -> Result<String, RpcError> {
        self.recv()
            .await
            .unwrap_or_else(|| Err(RpcError::WebSocket("head stream ended".into())))
    }
}

/// `eth_subscribe("newHeads")` on a node websocket.
pub struct WsNewHeads {
    url: String,
    subscription: String,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsNewHeads {
    /// Connect and subscribe. Returns once the node acknowledged the
    /// subscription.
    pub async fn subscribe(url: impl Into<String>) -> Result<Self, RpcError> {
        let url = url.into();
        info!(url = %url, "connecting to newHeads websocket");
        let (mut socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RpcError::WebSocket(format!("connect {url}: {e}")))?;

        let request = JsonRpcRequest::new(SUBSCRIBE_ID, "eth_subscribe", vec![json!("newHeads")]);
        let payload = serde_json::to_string(&request).map_err(|e| RpcError::decode("eth_subscribe", e))?;
        socket
            .send(Message::Text(payload))
            .await
            .map_err(|e| RpcError::WebSocket(e.to_string()))?;

        let subscription = loop {
            let text = read_text(&mut socket).await?;
            let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&text) else {
                continue;
            };
            if resp.id.as_number() != Some(SUBSCRIBE_ID) {
                continue;
            }
            let result = resp.into_result().map_err(|error| RpcError::Rpc {
                method: "eth_subscribe".into(),
                height: None,
                error,
            })?;
            match result.as_str() {
                Some(id) => break id.to_string(),
                None => return Err(RpcError::decode("eth_subscribe", format!("expected id, got {result}"))),
            }
        };

        info!(url = %url, subscription = %subscription, "subscribed to newHeads");
        Ok(Self {
            url,
            subscription,
            socket,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HeadStream for WsNewHeads {
    async fn next_message(&mut self) -> Result<String, RpcError> {
        read_text(&mut self.socket).await
    }
}

/// Next text frame. Pings are answered, pongs and binary frames skipped.
async fn read_text(socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> Result<String, RpcError> {
    loop {
        match socket.next().await {
            None => return Err(RpcError::WebSocket("stream ended".into())),
            Some(Err(e)) => return Err(RpcError::WebSocket(e.to_string())),
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Ping(data))) => {
                socket
                    .send(Message::Pong(data))
                    .await
                    .map_err(|e| RpcError::WebSocket(e.to_string()))?;
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(RpcError::WebSocket(format!("closed by server: {frame:?}")));
            }
            Some(Ok(_)) => debug!("ignoring non-text websocket frame"),
        }
    }
}

/// Extract the head height from a `newHeads` payload.
///
/// `Ok(None)` for messages that are not subscription notifications
/// (acknowledgements, unrelated responses). `Err` for malformed payloads.
pub fn parse_new_head(text: &str) -> Result<Option<u64>, RpcError> {
    const METHOD: &str = "eth_subscription";
    let value: Value = serde_json::from_str(text).map_err(|e| RpcError::decode(METHOD, e))?;
    if value.get("method").and_then(Value::as_str) != Some(METHOD) {
        return Ok(None);
    }
    let number = value
        .pointer("/params/result/number")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::decode(METHOD, "notification without params.result.number"))?;
    let height = Hex::parse(number)
        .and_then(|h| h.to_u64())
        .map_err(|e| RpcError::decode(METHOD, e))?;
    Ok(Some(height))
}
