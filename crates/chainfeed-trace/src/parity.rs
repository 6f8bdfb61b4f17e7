//! Flat `trace_block` records.
//!
//! The node already provides `traceAddress` and `subtraces`, so this is a
//! structural decode: read the record, pick the action shape from `type`.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use chainfeed_core::types::{
    CallAction, CallKind, CreateAction, RewardAction, SelfDestructAction, Trace, TraceAction,
    TraceResult,
};
use chainfeed_core::Hex;

use crate::{TraceError, TraceSource};

/// Strategy for nodes serving `trace_block`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParityTraces;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatTrace {
    action: Value,
    #[serde(default)]
    result: Option<FlatResult>,
    #[serde(default)]
    trace_address: Vec<usize>,
    #[serde(default)]
    subtraces: usize,
    #[serde(default)]
    transaction_hash: Option<Hex>,
    #[serde(default)]
    transaction_position: Option<u64>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FlatResult {
    gas_used: Hex,
    output: Hex,
    address: Hex,
    code: Hex,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatCall {
    #[serde(flatten)]
    action: CallAction,
    call_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatCreate {
    #[serde(flatten)]
    action: CreateAction,
    /// Erigon reports CREATE2 as `type: "create"` with this marker.
    #[serde(default)]
    creation_method: Option<String>,
}

impl TraceSource for ParityTraces {
    fn method(&self) -> &'static str {
        "trace_block"
    }

    fn params(&self, height_hex: &str) -> Vec<Value> {
        vec![json!(height_hex)]
    }

    fn parse_traces(&self, raw: Value, _tx_hashes: &[Hex]) -> Result<Vec<Trace>, TraceError> {
        if raw.is_null() {
            return Ok(vec![]);
        }
        let records: Vec<FlatTrace> = serde_json::from_value(raw)?;
        trace!(records = records.len(), "decoding trace_block records");
        records.into_iter().map(normalize).collect()
    }
}

fn normalize(record: FlatTrace) -> Result<Trace, TraceError> {
    let action = match record.kind.as_str() {
        "call" => {
            let call: FlatCall = serde_json::from_value(record.action)?;
            let call_type = CallKind::parse(&call.call_type)
                .ok_or_else(|| TraceError::UnknownCallType(call.call_type.clone()))?;
            TraceAction::Call {
                action: call.action,
                call_type,
            }
        }
        "create" | "create2" => {
            let create: FlatCreate = serde_json::from_value(record.action)?;
            let is_create2 = record.kind == "create2"
                || create.creation_method.as_deref() == Some("create2");
            if is_create2 {
                TraceAction::Create2(create.action)
            } else {
                TraceAction::Create(create.action)
            }
        }
        "suicide" => TraceAction::Suicide(serde_json::from_value::<SelfDestructAction>(record.action)?),
        "selfdestruct" => {
            TraceAction::SelfDestruct(serde_json::from_value::<SelfDestructAction>(record.action)?)
        }
        "reward" => TraceAction::Reward(serde_json::from_value::<RewardAction>(record.action)?),
        other => return Err(TraceError::UnknownType(other.to_string())),
    };

    let result = record.result.and_then(|r| match &action {
        TraceAction::Call { .. } => Some(TraceResult::Call {
            gas_used: r.gas_used,
            output: r.output,
        }),
        TraceAction::Create(_) | TraceAction::Create2(_) => Some(TraceResult::Create {
            gas_used: r.gas_used,
            address: r.address,
            code: r.code,
        }),
        _ => None,
    });

    Ok(Trace {
        action,
        result,
        trace_address: record.trace_address,
        subtraces: record.subtraces,
        tx_hash: record.transaction_hash.filter(|h| !h.is_empty()),
        tx_position: record.transaction_position,
        error: record.error,
    })
}
