//! End-to-end pipeline tests against an in-memory node.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chainfeed_core::{Block, BlockUnit, Hex, SharedCursor};
use chainfeed_evm::{EvmRpcClient, IngestError, PauseGate, ReceiverBuilder, Sequencer};
use chainfeed_rpc::{JsonRpcError, RpcError};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

fn unit(height: u64) -> BlockUnit {
    BlockUnit {
        height,
        block: Block {
            number: Hex::from_u64(height),
            hash: Hex::from_u64(0xbeef_0000 + height),
            ..Default::default()
        },
        receipts: vec![],
        traces: vec![],
    }
}

/// A node whose head can be moved by the test. Bulk responses come back in
/// reverse order to exercise the reorder buffer.
#[derive(Default)]
struct MockNode {
    head: AtomicU64,
    head_calls: AtomicUsize,
    fetched: AtomicUsize,
    /// Heights at or above this value fail with a node error.
    poison_from: AtomicU64,
    /// Number of upcoming `head` calls that fail with a transport error.
    head_failures: AtomicUsize,
    /// Number of upcoming `block_bulk` calls that fail with a node error.
    bulk_failures: AtomicUsize,
    /// Every `head` call returns an undecodable response.
    broken_head: AtomicBool,
}

impl MockNode {
    fn at(head: u64) -> Arc<Self> {
        let node = Self {
            poison_from: AtomicU64::new(u64::MAX),
            ..Default::default()
        };
        node.head.store(head, Ordering::SeqCst);
        Arc::new(node)
    }
}

#[async_trait]
impl EvmRpcClient for MockNode {
    async fn head(&self, _cancel: &CancellationToken) -> Result<u64, RpcError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_head.load(Ordering::SeqCst) {
            return Err(RpcError::Decode {
                method: "eth_blockNumber".into(),
                reason: "expected hex string".into(),
            });
        }
        if take_one(&self.head_failures) {
            return Err(RpcError::Http("connection reset".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_bulk(
        &self,
        heights: &[u64],
        _cancel: &CancellationToken,
    ) -> Result<Vec<BlockUnit>, RpcError> {
        let poison = self.poison_from.load(Ordering::SeqCst);
        let first = heights.first().copied();
        if take_one(&self.bulk_failures) {
            return Err(node_error(first));
        }
        if let Some(&h) = heights.iter().find(|&&h| h >= poison) {
            return Err(node_error(Some(h)));
        }
        self.fetched.fetch_add(heights.len(), Ordering::SeqCst);
        Ok(heights.iter().rev().map(|&h| unit(h)).collect())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn node_error(height: Option<u64>) -> RpcError {
    RpcError::Rpc {
        method: "trace_block".into(),
        height,
        error: JsonRpcError {
            code: -32000,
            message: "missing trie node".into(),
            data: None,
        },
    }
}

fn new_head(height: u64) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": { "subscription": "0xabc", "result": { "number": format!("{height:#x}") } }
    })
    .to_string()
}

async fn expect_heights(rx: &mut mpsc::Receiver<BlockUnit>, range: std::ops::RangeInclusive<u64>) {
    for expected in range {
        let got = rx.recv().await.expect("block stream ended early");
        assert_eq!(got.height, expected);
        assert_eq!(got.hash(), &Hex::from_u64(0xbeef_0000 + expected));
    }
}

/// Deterministic shuffle (xorshift) so failures are reproducible.
fn shuffle(items: &mut [u64], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        items.swap(i, (seed % (i as u64 + 1)) as usize);
    }
}

// ─── Sequencer ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gapless_under_permutation_with_duplicates() {
    for seed in [1u64, 7, 42, 1234, 99_991] {
        let mut heights: Vec<u64> = (51..=250).collect();
        heights.extend((60..=90).step_by(3));
        shuffle(&mut heights, seed);

        let (in_tx, in_rx) = mpsc::channel(heights.len());
        let (out_tx, mut out_rx) = mpsc::channel(heights.len());
        let cursor = SharedCursor::at(50);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Sequencer::new(in_rx, out_tx, cursor.clone()).run(cancel.clone()));

        for h in heights {
            in_tx.send(unit(h)).await.unwrap();
        }
        expect_heights(&mut out_rx, 51..=250).await;
        assert!(out_rx.try_recv().is_err(), "duplicates must not be re-emitted (seed {seed})");
        assert_eq!(cursor.height(), 250);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}

// ─── Receiver ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn catch_up_then_poll() {
    let node = MockNode::at(400);
    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(100)
        .capacity(128)
        .rpc_batch_size(16)
        .poll_interval_ms(50)
        .client(node.clone())
        .start()
        .await
        .unwrap();

    expect_heights(&mut outputs.blocks, 101..=400).await;
    assert_eq!(receiver.level(), (400, Hex::from_u64(0xbeef_0000 + 400)));

    node.head.store(405, Ordering::SeqCst);
    expect_heights(&mut outputs.blocks, 401..=405).await;

    receiver.close().await.unwrap();
    assert_eq!(node.fetched.load(Ordering::SeqCst), 305, "no height fetched twice");
}

#[tokio::test(start_paused = true)]
async fn follows_head_stream_and_skips_malformed_messages() {
    let node = MockNode::at(20);
    let (heads_tx, heads_rx) = mpsc::channel::<Result<String, RpcError>>(8);
    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(10)
        .client(node.clone())
        .heads(Box::new(heads_rx))
        .start()
        .await
        .unwrap();

    expect_heights(&mut outputs.blocks, 11..=20).await;

    heads_tx.send(Ok("{ this is not json".into())).await.unwrap();
    heads_tx
        .send(Ok(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xabc" }).to_string()))
        .await
        .unwrap();
    node.head.store(23, Ordering::SeqCst);
    let notification = json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": { "subscription": "0xabc", "result": { "number": "0x17", "hash": "0x01" } }
    });
    heads_tx.send(Ok(notification.to_string())).await.unwrap();
    expect_heights(&mut outputs.blocks, 21..=23).await;

    // Stream end is fatal and stops the receiver.
    drop(heads_tx);
    receiver.stopped().await;
    let err = receiver.close().await.unwrap_err();
    assert!(matches!(err, IngestError::Rpc(RpcError::WebSocket(_))));
}

#[tokio::test(start_paused = true)]
async fn genesis_handoff_precedes_blocks() {
    let dir = std::env::temp_dir().join(format!("chainfeed-pipeline-genesis-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("genesis.json"),
        json!({ "config": { "chainId": 7 }, "alloc": {}, "gasLimit": "0x1000" }).to_string(),
    )
    .unwrap();

    let node = MockNode::at(3);
    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(0)
        .assets_dir(&dir)
        .client(node.clone())
        .start()
        .await
        .unwrap();

    let handoff = outputs.genesis.recv().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(node.head_calls.load(Ordering::SeqCst), 0, "sync waits for the acknowledgement");

    let genesis = handoff.acknowledge();
    assert_eq!(genesis.config.chain_id, 7);
    expect_heights(&mut outputs.blocks, 1..=3).await;
    assert!(outputs.genesis.recv().await.is_none(), "genesis is handed off once");

    receiver.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rollback_barrier_holds_dispatch() {
    let node = MockNode::at(5);
    let gate = Arc::new(PauseGate::new());
    gate.pause();

    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(1)
        .client(node.clone())
        .barrier(gate.clone())
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(node.head_calls.load(Ordering::SeqCst), 0);
    assert!(outputs.blocks.try_recv().is_err());

    gate.resume();
    expect_heights(&mut outputs.blocks, 2..=5).await;
    receiver.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn node_error_during_catch_up_stops_everything() {
    let node = MockNode::at(50);
    node.poison_from.store(30, Ordering::SeqCst);

    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(10)
        .client(node.clone())
        .start()
        .await
        .unwrap();

    receiver.stopped().await;
    let err = receiver.close().await.unwrap_err();
    match err {
        IngestError::Rpc(RpcError::Rpc { height, .. }) => assert!(height.unwrap() >= 30),
        other => panic!("unexpected error: {other:?}"),
    }
    // Whatever was emitted before the failure is still ordered and gapless.
    let mut expected = 11;
    while let Ok(u) = outputs.blocks.try_recv() {
        assert_eq!(u.height, expected);
        expected += 1;
    }
    assert!(expected <= 30);
}

#[tokio::test(start_paused = true)]
async fn dropped_consumer_is_fatal() {
    let node = MockNode::at(500);
    let (receiver, outputs) = ReceiverBuilder::new()
        .start_height(1)
        .channel_size(4)
        .client(node)
        .start()
        .await
        .unwrap();
    drop(outputs);

    receiver.stopped().await;
    let err = receiver.close().await.unwrap_err();
    assert!(matches!(err, IngestError::ChannelClosed { .. }));
}

#[tokio::test(start_paused = true)]
async fn close_is_graceful() {
    let node = MockNode::at(10);
    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(5)
        .client(node)
        .start()
        .await
        .unwrap();
    expect_heights(&mut outputs.blocks, 6..=10).await;
    assert!(!receiver.is_stopped());
    receiver.close().await.unwrap();
    assert!(outputs.blocks.recv().await.is_none(), "channels released after close");
}

#[tokio::test(start_paused = true)]
async fn pause_while_waiting_for_a_head_holds_dispatch() {
    let node = MockNode::at(5);
    let gate = Arc::new(PauseGate::new());
    let (heads_tx, heads_rx) = mpsc::channel::<Result<String, RpcError>>(8);
    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(1)
        .client(node.clone())
        .heads(Box::new(heads_rx))
        .barrier(gate.clone())
        .start()
        .await
        .unwrap();
    expect_heights(&mut outputs.blocks, 2..=5).await;

    // The driver is now blocked reading the stream.
    tokio::time::sleep(Duration::from_secs(1)).await;
    gate.pause();
    node.head.store(8, Ordering::SeqCst);
    heads_tx.send(Ok(new_head(8))).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(node.fetched.load(Ordering::SeqCst), 4, "nothing fetched while paused");
    assert_eq!(receiver.cursor().height(), 5);
    assert!(outputs.blocks.try_recv().is_err());

    gate.resume();
    expect_heights(&mut outputs.blocks, 6..=8).await;
    receiver.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn polling_survives_transient_errors() {
    let node = MockNode::at(10);
    let (receiver, mut outputs) = ReceiverBuilder::new()
        .start_height(5)
        .poll_interval_ms(50)
        .client(node.clone())
        .start()
        .await
        .unwrap();
    expect_heights(&mut outputs.blocks, 6..=10).await;

    // A failed fetch leaves the range to the next tick.
    node.bulk_failures.store(1, Ordering::SeqCst);
    node.head.store(14, Ordering::SeqCst);
    expect_heights(&mut outputs.blocks, 11..=14).await;

    // So does a failed head request.
    node.head_failures.store(1, Ordering::SeqCst);
    node.head.store(16, Ordering::SeqCst);
    expect_heights(&mut outputs.blocks, 15..=16).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(outputs.blocks.try_recv().is_err(), "no duplicates");
    assert_eq!(node.bulk_failures.load(Ordering::SeqCst), 0);
    assert_eq!(node.head_failures.load(Ordering::SeqCst), 0);
    assert!(!receiver.is_stopped());
    receiver.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_failure_is_reported_not_the_closed_channel() {
    for _ in 0..100 {
        let node = MockNode::at(10);
        node.broken_head.store(true, Ordering::SeqCst);
        let (receiver, _outputs) = ReceiverBuilder::new()
            .start_height(1)
            .client(node)
            .start()
            .await
            .unwrap();

        receiver.stopped().await;
        let err = receiver.close().await.unwrap_err();
        assert!(
            matches!(err, IngestError::Rpc(RpcError::Decode { .. })),
            "sync error masked by {err}"
        );
    }
}
