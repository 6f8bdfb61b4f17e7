//! Nested `callTracer` frames.
//!
//! Each transaction yields one root frame whose children sit in `calls`.
//! Frames are flattened depth-first (parent before descendants, siblings in
//! array order), synthesizing `trace_address` from the child-index path and
//! `subtraces` from `calls.len()`.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use chainfeed_core::types::{
    CallAction, CallKind, CreateAction, SelfDestructAction, Trace, TraceAction, TraceResult,
};
use chainfeed_core::Hex;

use crate::{TraceError, TraceSource};

/// Strategy for nodes serving `debug_traceBlockByNumber` with `callTracer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GethTraces;

/// One `callTracer` frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub from: Hex,
    #[serde(default)]
    pub to: Hex,
    #[serde(default)]
    pub value: Hex,
    #[serde(default)]
    pub gas: Hex,
    #[serde(default)]
    pub gas_used: Hex,
    #[serde(default)]
    pub input: Hex,
    #[serde(default)]
    pub output: Hex,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub calls: Vec<CallFrame>,
}

/// A per-transaction entry of the block response. Newer nodes wrap the frame
/// as `{ txHash, result }`; older ones return `{ result }` or the bare frame.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TxEntry {
    Wrapped {
        #[serde(rename = "txHash", default)]
        tx_hash: Option<Hex>,
        result: CallFrame,
    },
    Bare(CallFrame),
}

impl TxEntry {
    fn into_parts(self) -> (Option<Hex>, CallFrame) {
        match self {
            Self::Wrapped { tx_hash, result } => (tx_hash.filter(|h| !h.is_empty()), result),
            Self::Bare(frame) => (None, frame),
        }
    }
}

impl TraceSource for GethTraces {
    fn method(&self) -> &'static str {
        "debug_traceBlockByNumber"
    }

    fn params(&self, height_hex: &str) -> Vec<Value> {
        vec![json!(height_hex), json!({ "tracer": "callTracer" })]
    }

    fn parse_traces(&self, raw: Value, tx_hashes: &[Hex]) -> Result<Vec<Trace>, TraceError> {
        if raw.is_null() {
            return Ok(vec![]);
        }
        let entries: Vec<TxEntry> = serde_json::from_value(raw)?;
        let mut traces = Vec::new();
        for (position, entry) in entries.into_iter().enumerate() {
            let (wrapped_hash, root) = entry.into_parts();
            let tx_hash = wrapped_hash.or_else(|| tx_hashes.get(position).cloned());
            flatten(root, tx_hash, position as u64, &mut traces)?;
        }
        debug!(traces = traces.len(), "flattened callTracer frames");
        Ok(traces)
    }
}

/// Depth-first pre-order walk with an explicit stack; children are pushed in
/// reverse so they pop in array order.
fn flatten(
    root: CallFrame,
    tx_hash: Option<Hex>,
    tx_position: u64,
    out: &mut Vec<Trace>,
) -> Result<(), TraceError> {
    let mut stack: Vec<(CallFrame, Vec<usize>)> = vec![(root, Vec::new())];

    while let Some((mut frame, address)) = stack.pop() {
        let children = std::mem::take(&mut frame.calls);
        let subtraces = children.len();
        for (index, child) in children.into_iter().enumerate().rev() {
            let mut child_address = address.clone();
            child_address.push(index);
            stack.push((child, child_address));
        }

        let (action, result) = classify(frame.kind.as_str(), &frame)?;
        out.push(Trace {
            action,
            result: if frame.error.is_some() { None } else { result },
            trace_address: address,
            subtraces,
            tx_hash: tx_hash.clone(),
            tx_position: Some(tx_position),
            error: frame.error,
        });
    }
    Ok(())
}

/// Map a frame's native type onto the shared trace type set.
fn classify(kind: &str, frame: &CallFrame) -> Result<(TraceAction, Option<TraceResult>), TraceError> {
    let upper = kind.to_ascii_uppercase();
    match upper.as_str() {
        "CALL" | "STATICCALL" | "DELEGATECALL" | "CALLCODE" => {
            let call_type =
                CallKind::parse(&upper).ok_or_else(|| TraceError::UnknownCallType(kind.to_string()))?;
            let action = TraceAction::Call {
                action: CallAction {
                    from: frame.from.clone(),
                    to: frame.to.clone(),
                    gas: frame.gas.clone(),
                    value: frame.value.clone(),
                    input: frame.input.clone(),
                },
                call_type,
            };
            let result = TraceResult::Call {
                gas_used: frame.gas_used.clone(),
                output: frame.output.clone(),
            };
            Ok((action, Some(result)))
        }
        "CREATE" | "CREATE2" => {
            let create = CreateAction {
                from: frame.from.clone(),
                gas: frame.gas.clone(),
                value: frame.value.clone(),
                init: frame.input.clone(),
            };
            let action = if upper == "CREATE2" {
                TraceAction::Create2(create)
            } else {
                TraceAction::Create(create)
            };
            let result = TraceResult::Create {
                gas_used: frame.gas_used.clone(),
                address: frame.to.clone(),
                code: frame.output.clone(),
            };
            Ok((action, Some(result)))
        }
        "SELFDESTRUCT" | "SUICIDE" => {
            let destruct = SelfDestructAction {
                address: frame.from.clone(),
                refund_address: frame.to.clone(),
                balance: frame.value.clone(),
            };
            let action = if upper == "SUICIDE" {
                TraceAction::Suicide(destruct)
            } else {
                TraceAction::SelfDestruct(destruct)
            };
            Ok((action, None))
        }
        _ => Err(TraceError::UnknownType(kind.to_string())),
    }
}
