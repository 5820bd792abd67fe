//! CLI implementation for txwatch
//!
//! Subscribes addresses and queries their transactions from the command
//! line. All commands output pretty JSON.

use crate::config::{parse_address, ScanConfig, Strategy, DEFAULT_MAX_IN_FLIGHT};
use crate::discovery::{ConcurrentScanner, MemoizingScanner, TransactionDiscovery};
use crate::records::{Subscriber, TransactionRecord};
use crate::rpc::RpcClient;
use crate::store::RocksStateStore;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Connection and strategy settings shared by both binaries.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// RPC endpoint URL (e.g., https://eth.llamarpc.com)
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./txwatch_db")]
    pub db_path: PathBuf,

    /// Discovery strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Memoizing)]
    pub strategy: Strategy,

    /// Maximum blocks fetched at once by the concurrent strategy
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    /// Per-request RPC timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub rpc_timeout_secs: u64,
}

impl EngineArgs {
    /// Open the store and RPC client and build the selected strategy.
    pub fn build(&self) -> Result<Box<dyn TransactionDiscovery>> {
        let rpc = RpcClient::with_timeout(
            self.rpc_url.clone(),
            Duration::from_secs(self.rpc_timeout_secs),
        )?;
        let store = RocksStateStore::open(&self.db_path)
            .with_context(|| format!("Failed to open database at {:?}", self.db_path))?;

        let rpc = Arc::new(rpc);
        let store = Arc::new(store);
        let discovery: Box<dyn TransactionDiscovery> = match self.strategy {
            Strategy::Concurrent => Box::new(ConcurrentScanner::new(
                rpc,
                store,
                ScanConfig::new(self.max_in_flight),
            )),
            Strategy::Memoizing => Box::new(MemoizingScanner::new(rpc, store)),
        };
        Ok(discovery)
    }
}

/// Transaction discovery CLI tool
#[derive(Parser)]
#[command(name = "txwatch")]
#[command(about = "Track the transactions of Ethereum addresses since subscription")]
pub struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start tracking an address from the current block
    Subscribe {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
    },
    /// List the transactions of an address since it was subscribed
    Transactions {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
    },
    /// Show the last checkpointed block
    CurrentBlock,
}

fn subscriber_json(sub: &Subscriber) -> Value {
    json!({
        "status": "ok",
        "address": format!("0x{:x}", sub.address),
        "subscribe_block_number": sub.subscribe_block_number,
        "subscribe_tx_count": sub.subscribe_tx_count,
    })
}

fn transactions_json(address: &str, txs: &[TransactionRecord]) -> Result<Value> {
    Ok(json!({
        "address": address,
        "count": txs.len(),
        "transactions": serde_json::to_value(txs).context("Failed to serialize transactions")?,
    }))
}

/// Run one command against a discovery engine.
pub async fn execute(discovery: &dyn TransactionDiscovery, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::Subscribe { address } => {
            let addr = parse_address(&address)?;
            let sub = discovery.subscribe(addr).await?;
            subscriber_json(&sub)
        }
        Commands::Transactions { address } => {
            let addr = parse_address(&address)?;
            let txs = discovery.get_transactions(addr).await?;
            transactions_json(&format!("0x{:x}", addr), &txs)?
        }
        Commands::CurrentBlock => {
            let block = discovery.get_current_block().await?;
            json!({ "current_block": block })
        }
    };
    Ok(result)
}

/// Parse arguments, run the command and print JSON output.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let discovery = cli.engine.build()?;
    let result = execute(discovery.as_ref(), cli.command).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::mock::{addr, other, MockChain};
    use crate::store::MemoryStore;

    fn engine(chain: &Arc<MockChain>) -> MemoizingScanner<MockChain, MemoryStore> {
        MemoizingScanner::new(Arc::clone(chain), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_parse_engine_args() {
        let cli = Cli::try_parse_from([
            "txwatch",
            "--strategy",
            "concurrent",
            "--max-in-flight",
            "4",
            "transactions",
            "0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb",
        ])
        .unwrap();
        assert_eq!(cli.engine.strategy, Strategy::Concurrent);
        assert_eq!(cli.engine.max_in_flight, 4);
        assert!(matches!(cli.command, Commands::Transactions { .. }));
    }

    #[test]
    fn test_default_strategy_is_memoizing() {
        let cli = Cli::try_parse_from(["txwatch", "current-block"]).unwrap();
        assert_eq!(cli.engine.strategy, Strategy::Memoizing);
        assert_eq!(cli.engine.rpc_url, "http://127.0.0.1:8545");
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let chain = Arc::new(MockChain::new(7));
        let discovery = engine(&chain);
        let address = format!("0x{:x}", addr());

        let out = execute(&discovery, Commands::Subscribe { address: address.clone() })
            .await
            .unwrap();
        assert_eq!(out["status"], "ok");
        assert_eq!(out["subscribe_block_number"], 7);

        chain.add_tx(9, other(), addr());
        chain.set_tip(9);
        let out = execute(&discovery, Commands::Transactions { address })
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["transactions"][0]["transactionIndex"], 0);
        assert_eq!(out["transactions"][0]["blockNumber"], 9);

        let out = execute(&discovery, Commands::CurrentBlock).await.unwrap();
        assert_eq!(out["current_block"], 9);
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_address() {
        let chain = Arc::new(MockChain::new(7));
        let discovery = engine(&chain);
        let result = execute(
            &discovery,
            Commands::Subscribe {
                address: "0x1234".to_string(),
            },
        )
        .await;
        assert!(result.is_err());
    }
}
