//! ChainFeed CLI — run the ordered block receiver against an EVM node.
//!
//! # Commands
//! ```text
//! chainfeed run   --config <chainfeed.yaml> [--start <height>] [--stop-at <height>] [--json-logs]
//! chainfeed head  --rpc <url> [--trace-format parity|geth] [--height <n>]
//! chainfeed info
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chainfeed_core::{BlockUnit, ReceiverConfig, TraceFormat};
use chainfeed_evm::ReceiverBuilder;
use chainfeed_rpc::RpcClient;

mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "chainfeed",
    about = "Ordered block ingestion from an EVM node",
    long_about = "
ChainFeed: pull blocks, receipts and call traces from an EVM JSON-RPC node
and emit them in strict, gapless height order.

ENVIRONMENT VARIABLES:
  CHAINFEED_RPC_URL   overrides receiver.rpc_url
  CHAINFEED_WS_URL    overrides receiver.ws_url
  RUST_LOG            overrides the log section of the config file
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the receiver and log every block it emits
    Run {
        /// YAML file with `receiver` and `log` sections
        #[arg(short, long)]
        config: PathBuf,
        /// Last height already processed (overrides receiver.start_height)
        #[arg(long)]
        start: Option<u64>,
        /// Exit after emitting this height
        #[arg(long)]
        stop_at: Option<u64>,
        #[arg(long, env = "CHAINFEED_RPC_URL")]
        rpc: Option<String>,
        #[arg(long, env = "CHAINFEED_WS_URL")]
        ws: Option<String>,
        /// Emit JSON log lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the node's current head, optionally with one fetched block
    Head {
        #[arg(long, env = "CHAINFEED_RPC_URL")]
        rpc: String,
        #[arg(long, default_value = "parity", value_parser = parse_trace_format)]
        trace_format: TraceFormat,
        /// Also fetch block, receipts and traces at this height
        #[arg(long)]
        height: Option<u64>,
    },

    /// Show version and a default configuration file
    Info,
}

/// On-disk layout of `chainfeed.yaml`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct FileConfig {
    receiver: ReceiverConfig,
    log: LogConfig,
}

fn parse_trace_format(s: &str) -> Result<TraceFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "parity" => Ok(TraceFormat::Parity),
        "geth" => Ok(TraceFormat::Geth),
        other => Err(format!("unknown trace format '{other}' (expected parity or geth)")),
    }
}

fn load_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            start,
            stop_at,
            rpc,
            ws,
            json_logs,
        } => {
            let mut file = load_config(&config)?;
            file.log.json |= json_logs;
            init_tracing(&file.log);

            let receiver = &mut file.receiver;
            if let Some(rpc) = rpc {
                receiver.rpc_url = rpc;
            }
            if let Some(ws) = ws {
                receiver.ws_url = Some(ws);
            }
            if let Some(start) = start {
                receiver.start_height = start;
            }
            cmd_run(file.receiver, stop_at).await
        }

        Commands::Head {
            rpc,
            trace_format,
            height,
        } => {
            init_tracing(&LogConfig {
                level: "warn".into(),
                ..LogConfig::default()
            });
            cmd_head(rpc, trace_format, height).await
        }

        Commands::Info => {
            println!("chainfeed v{}", env!("CARGO_PKG_VERSION"));
            println!("Ordered block ingestion for EVM JSON-RPC nodes");
            println!();
            println!("Crates:");
            println!("  chainfeed-core   Hex codec, block/receipt/trace types, cursor, config");
            println!("  chainfeed-trace  parity (trace_block) and geth (callTracer) normalizers");
            println!("  chainfeed-rpc    batched JSON-RPC client, rate limiter, newHeads subscription");
            println!("  chainfeed-evm    fetcher, sequencer, sync driver, receiver lifecycle");
            println!();
            println!("Default configuration:");
            print!("{}", serde_yaml::to_string(&FileConfig::default())?);
            Ok(())
        }
    }
}

async fn cmd_run(config: ReceiverConfig, stop_at: Option<u64>) -> Result<()> {
    if let Some(stop) = stop_at {
        if stop <= config.start_height {
            return Err(anyhow!(
                "--stop-at {stop} must be above the start height {}",
                config.start_height
            ));
        }
    }

    let (receiver, mut outputs) = ReceiverBuilder::from_config(config)
        .start()
        .await
        .context("starting receiver")?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for interrupt");
                }
                info!("interrupt received, shutting down");
                break;
            }
            _ = receiver.stopped() => break,
            Some(handoff) = outputs.genesis.recv() => {
                let genesis = handoff.acknowledge();
                info!(
                    chain_id = genesis.config.chain_id,
                    accounts = genesis.alloc.len(),
                    "genesis received"
                );
            }
            unit = outputs.blocks.recv() => {
                let Some(unit) = unit else { break };
                log_block(&unit);
                if stop_at == Some(unit.height) {
                    info!(height = unit.height, "stop height reached");
                    break;
                }
            }
        }
    }

    receiver.close().await.context("receiver stopped with an error")
}

fn log_block(unit: &BlockUnit) {
    info!(
        height = unit.height,
        hash = %unit.hash(),
        txs = unit.block.transactions.len(),
        receipts = unit.receipts.len(),
        traces = unit.traces.len(),
        "block"
    );
}

async fn cmd_head(rpc: String, trace_format: TraceFormat, height: Option<u64>) -> Result<()> {
    let config = ReceiverConfig {
        rpc_url: rpc,
        trace_format,
        ..ReceiverConfig::default()
    };
    let client = RpcClient::from_config(&config).context("building RPC client")?;
    let cancel = CancellationToken::new();

    let head = client.head(&cancel).await.context("eth_blockNumber")?;
    let mut out = json!({ "rpc": client.url(), "head": head });

    if let Some(h) = height {
        let unit = client
            .block_bulk(&[h], &cancel)
            .await
            .with_context(|| format!("fetching height {h}"))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("node returned nothing for height {h}"))?;
        out["block"] = json!({
            "height": unit.height,
            "hash": unit.hash().to_string(),
            "parentHash": unit.block.parent_hash.to_string(),
            "transactions": unit.block.transactions.len(),
            "receipts": unit.receipts.len(),
            "traces": unit.traces.len(),
        });
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
