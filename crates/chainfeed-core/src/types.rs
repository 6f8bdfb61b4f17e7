//! Shared types for the ingestion pipeline.
//!
//! Wire structs mirror the node's JSON-RPC field names (`camelCase`) and keep
//! every quantity as [`Hex`]; consumers extract typed values on demand.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::hex::Hex;

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block as returned by `eth_getBlockByNumber(height, true)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Block {
    pub number: Hex,
    pub hash: Hex,
    pub parent_hash: Hex,
    pub nonce: Hex,
    pub sha3_uncles: Hex,
    pub logs_bloom: Hex,
    pub transactions_root: Hex,
    pub state_root: Hex,
    pub receipts_root: Hex,
    pub miner: Hex,
    pub difficulty: Hex,
    pub total_difficulty: Hex,
    pub extra_data: Hex,
    pub size: Hex,
    pub gas_limit: Hex,
    pub gas_used: Hex,
    pub timestamp: Hex,
    pub mix_hash: Hex,
    pub base_fee_per_gas: Hex,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Hex>,
    pub withdrawals: Vec<Withdrawal>,
}

impl Block {
    /// Hashes of the block's transactions, in block order.
    pub fn tx_hashes(&self) -> Vec<Hex> {
        self.transactions.iter().map(|tx| tx.hash.clone()).collect()
    }
}

/// A full transaction object embedded in a block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transaction {
    pub hash: Hex,
    pub nonce: Hex,
    pub block_hash: Hex,
    pub block_number: Hex,
    pub transaction_index: Hex,
    pub from: Hex,
    pub to: Hex,
    pub value: Hex,
    pub gas: Hex,
    pub gas_price: Hex,
    pub max_fee_per_gas: Hex,
    pub max_priority_fee_per_gas: Hex,
    pub input: Hex,
    #[serde(rename = "type")]
    pub tx_type: Hex,
    pub chain_id: Hex,
    pub v: Hex,
    pub r: Hex,
    pub s: Hex,
}

/// A beacon-chain withdrawal (post-Shanghai blocks).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Withdrawal {
    pub index: Hex,
    pub validator_index: Hex,
    pub address: Hex,
    pub amount: Hex,
}

// ─── Receipt ──────────────────────────────────────────────────────────────────

/// A transaction receipt as returned by `eth_getBlockReceipts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Receipt {
    pub transaction_hash: Hex,
    pub transaction_index: Hex,
    pub block_hash: Hex,
    pub block_number: Hex,
    pub from: Hex,
    pub to: Hex,
    pub cumulative_gas_used: Hex,
    pub gas_used: Hex,
    pub effective_gas_price: Hex,
    pub contract_address: Hex,
    pub logs: Vec<Log>,
    pub logs_bloom: Hex,
    pub status: Hex,
    #[serde(rename = "type")]
    pub tx_type: Hex,
}

/// An event log attached to a receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Log {
    pub address: Hex,
    pub topics: Vec<Hex>,
    pub data: Hex,
    pub block_number: Hex,
    pub block_hash: Hex,
    pub transaction_hash: Hex,
    pub transaction_index: Hex,
    pub log_index: Hex,
    pub removed: bool,
}

// ─── Trace ────────────────────────────────────────────────────────────────────

/// Secondary classification of `call` traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Call,
    StaticCall,
    DelegateCall,
    CallCode,
}

impl CallKind {
    /// Parse the node's call kind string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" => Some(Self::Call),
            "staticcall" => Some(Self::StaticCall),
            "delegatecall" => Some(Self::DelegateCall),
            "callcode" => Some(Self::CallCode),
            _ => None,
        }
    }
}

/// The shared trace type set both node formats normalize into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Call,
    Create,
    Create2,
    SelfDestruct,
    Suicide,
    Reward,
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Create => write!(f, "create"),
            Self::Create2 => write!(f, "create2"),
            Self::SelfDestruct => write!(f, "selfdestruct"),
            Self::Suicide => write!(f, "suicide"),
            Self::Reward => write!(f, "reward"),
        }
    }
}

/// Call frame input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAction {
    pub from: Hex,
    pub to: Hex,
    pub gas: Hex,
    pub value: Hex,
    pub input: Hex,
}

/// Contract creation input. There is no `to`: the address is a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAction {
    pub from: Hex,
    pub gas: Hex,
    pub value: Hex,
    pub init: Hex,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfDestructAction {
    pub address: Hex,
    pub refund_address: Hex,
    pub balance: Hex,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardAction {
    pub author: Hex,
    pub value: Hex,
    pub reward_type: String,
}

/// What a trace did, one case per trace type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceAction {
    Call {
        #[serde(flatten)]
        action: CallAction,
        #[serde(rename = "callType")]
        call_type: CallKind,
    },
    Create(CreateAction),
    Create2(CreateAction),
    SelfDestruct(SelfDestructAction),
    Suicide(SelfDestructAction),
    Reward(RewardAction),
}

impl TraceAction {
    pub fn kind(&self) -> TraceKind {
        match self {
            Self::Call { .. } => TraceKind::Call,
            Self::Create(_) => TraceKind::Create,
            Self::Create2(_) => TraceKind::Create2,
            Self::SelfDestruct(_) => TraceKind::SelfDestruct,
            Self::Suicide(_) => TraceKind::Suicide,
            Self::Reward(_) => TraceKind::Reward,
        }
    }
}

/// What a trace produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TraceResult {
    Create {
        #[serde(rename = "gasUsed")]
        gas_used: Hex,
        address: Hex,
        code: Hex,
    },
    Call {
        #[serde(rename = "gasUsed")]
        gas_used: Hex,
        output: Hex,
    },
}

/// One node of a transaction's execution tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub action: TraceAction,
    pub result: Option<TraceResult>,
    /// Child-index path from the transaction's root call; empty = root.
    pub trace_address: Vec<usize>,
    /// Number of direct children.
    pub subtraces: usize,
    pub tx_hash: Option<Hex>,
    /// Index of the transaction in the block; `None` for block rewards.
    pub tx_position: Option<u64>,
    pub error: Option<String>,
}

impl Trace {
    pub fn kind(&self) -> TraceKind {
        self.action.kind()
    }
}

/// Why a trace set fails [`validate_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    /// A non-root trace whose parent address is missing.
    OrphanTrace { tx_position: Option<u64>, address: Vec<usize> },
    /// `subtraces` disagrees with the number of direct children present.
    SubtraceMismatch {
        tx_position: Option<u64>,
        address: Vec<usize>,
        declared: usize,
        found: usize,
    },
}

/// Check the per-transaction tree invariant over a block's traces.
///
/// Transactions are checked in position order. Within one transaction every
/// address is first checked for a parent, then every `subtraces` count, so a
/// missing parent is reported as an orphan rather than as a count mismatch.
/// Reward traces (no transaction position) are excluded.
pub fn validate_tree(traces: &[Trace]) -> Result<(), TreeViolation> {
    let mut by_tx: BTreeMap<u64, Vec<&Trace>> = BTreeMap::new();
    for trace in traces {
        if let Some(pos) = trace.tx_position {
            by_tx.entry(pos).or_default().push(trace);
        }
    }

    for (pos, tx_traces) in by_tx {
        let present: HashSet<&[usize]> = tx_traces.iter().map(|t| t.trace_address.as_slice()).collect();
        let mut children: HashMap<&[usize], usize> = HashMap::new();

        for trace in &tx_traces {
            let Some((_, parent)) = trace.trace_address.split_last() else {
                continue;
            };
            if !present.contains(parent) {
                return Err(TreeViolation::OrphanTrace {
                    tx_position: Some(pos),
                    address: trace.trace_address.clone(),
                });
            }
            *children.entry(parent).or_default() += 1;
        }

        for trace in &tx_traces {
            let found = children.get(trace.trace_address.as_slice()).copied().unwrap_or(0);
            if found != trace.subtraces {
                return Err(TreeViolation::SubtraceMismatch {
                    tx_position: Some(pos),
                    address: trace.trace_address.clone(),
                    declared: trace.subtraces,
                    found,
                });
            }
        }
    }
    Ok(())
}

// ─── BlockUnit ────────────────────────────────────────────────────────────────

/// One height's block, receipts and traces: the unit moved through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockUnit {
    pub height: u64,
    pub block: Block,
    pub receipts: Vec<Receipt>,
    pub traces: Vec<Trace>,
}

impl BlockUnit {
    pub fn hash(&self) -> &Hex {
        &self.block.hash
    }
}

// ─── Genesis ──────────────────────────────────────────────────────────────────

/// Chain configuration section of `genesis.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(default)]
    pub chain_id: u64,
    /// Fork activation blocks/times and any client-specific settings.
    #[serde(flatten)]
    pub forks: BTreeMap<String, serde_json::Value>,
}

/// A pre-funded account in the genesis allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisAccount {
    pub balance: Hex,
    pub nonce: Hex,
    pub code: Hex,
    pub storage: BTreeMap<String, Hex>,
}

/// The structured `genesis.json` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Genesis {
    pub config: ChainConfig,
    /// Address (hex, with or without `0x`) → account.
    pub alloc: BTreeMap<String, GenesisAccount>,
    pub nonce: Hex,
    pub timestamp: Hex,
    pub extra_data: Hex,
    pub gas_limit: Hex,
    pub difficulty: Hex,
    pub mix_hash: Hex,
    pub coinbase: Hex,
    pub number: Hex,
    pub gas_used: Hex,
    pub parent_hash: Hex,
    pub base_fee_per_gas: Hex,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call_trace(tx: u64, address: Vec<usize>, subtraces: usize) -> Trace {
        Trace {
            action: TraceAction::Call {
                action: CallAction::default(),
                call_type: CallKind::Call,
            },
            result: None,
            trace_address: address,
            subtraces,
            tx_hash: None,
            tx_position: Some(tx),
            error: None,
        }
    }

    #[test]
    fn decode_block_with_transactions() {
        let json = serde_json::json!({
            "number": "0x10",
            "hash": "0xabcd",
            "parentHash": "0x1234",
            "timestamp": "0x5f5e1000",
            "baseFeePerGas": null,
            "transactions": [
                { "hash": "0xaa", "from": "0x01", "to": null, "value": "0x0", "input": "0x" }
            ],
            "uncles": []
        });
        let block: Block = serde_json::from_value(json).unwrap();
        assert_eq!(block.number.to_u64().unwrap(), 16);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].to.is_empty());
        assert!(block.base_fee_per_gas.is_empty());
        assert_eq!(block.tx_hashes(), vec![Hex::parse("0xaa").unwrap()]);
    }

    #[test]
    fn decode_receipt_with_logs() {
        let json = serde_json::json!({
            "transactionHash": "0xaa",
            "status": "0x1",
            "contractAddress": null,
            "logs": [{ "address": "0x02", "topics": ["0xdd"], "data": "0x", "logIndex": "0x0" }]
        });
        let receipt: Receipt = serde_json::from_value(json).unwrap();
        assert_eq!(receipt.status.to_u64().unwrap(), 1);
        assert_eq!(receipt.logs[0].topics.len(), 1);
        assert!(!receipt.logs[0].removed);
    }

    #[test]
    fn call_kind_parse_is_case_insensitive() {
        assert_eq!(CallKind::parse("STATICCALL"), Some(CallKind::StaticCall));
        assert_eq!(CallKind::parse("delegatecall"), Some(CallKind::DelegateCall));
        assert_eq!(CallKind::parse("CREATE"), None);
    }

    #[test]
    fn valid_tree_passes() {
        let traces = vec![
            call_trace(0, vec![], 2),
            call_trace(0, vec![0], 0),
            call_trace(0, vec![1], 1),
            call_trace(0, vec![1, 0], 0),
            call_trace(1, vec![], 0),
        ];
        assert_eq!(validate_tree(&traces), Ok(()));
    }

    #[test]
    fn orphan_trace_is_rejected() {
        // The root also declares a wrong count; the orphan is reported first.
        let traces = vec![call_trace(0, vec![], 1), call_trace(0, vec![1, 0], 0)];
        assert_eq!(
            validate_tree(&traces),
            Err(TreeViolation::OrphanTrace {
                tx_position: Some(0),
                address: vec![1, 0],
            })
        );
    }

    #[test]
    fn violations_reported_in_transaction_order() {
        let traces = vec![
            call_trace(2, vec![], 5),
            call_trace(1, vec![], 0),
            call_trace(1, vec![0, 0], 0),
        ];
        assert!(matches!(
            validate_tree(&traces),
            Err(TreeViolation::OrphanTrace { tx_position: Some(1), .. })
        ));
    }

    #[test]
    fn subtrace_count_must_match_children() {
        let traces = vec![call_trace(0, vec![], 3), call_trace(0, vec![0], 0)];
        assert!(matches!(
            validate_tree(&traces),
            Err(TreeViolation::SubtraceMismatch { declared: 3, found: 1, .. })
        ));
    }

    #[test]
    fn decode_genesis() {
        let json = serde_json::json!({
            "config": { "chainId": 1337, "londonBlock": 0, "clique": { "period": 5 } },
            "alloc": {
                "0x0000000000000000000000000000000000000001": { "balance": "0xde0b6b3a7640000" }
            },
            "gasLimit": "0x1c9c380",
            "difficulty": "0x1",
            "extraData": "0x"
        });
        let genesis: Genesis = serde_json::from_value(json).unwrap();
        assert_eq!(genesis.config.chain_id, 1337);
        assert!(genesis.config.forks.contains_key("londonBlock"));
        assert_eq!(genesis.alloc.len(), 1);
        assert_eq!(genesis.gas_limit.to_u64().unwrap(), 30_000_000);
        assert!(genesis.extra_data.is_empty());
    }
}
