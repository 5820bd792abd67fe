//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints.
//! Handles hex string parsing and error handling.

use crate::types::{parse_hex_u64, Block};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// What discovery needs from a node.
///
/// The node only answers per-address transaction counts and per-block
/// transaction listings; there is no "transactions by address" index.
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Get the number of the most recent block.
    async fn get_block_number(&self) -> Result<u64>;

    /// Get the transaction count of `address` as of `end_block`.
    async fn get_tx_count(&self, address: Address, end_block: u64) -> Result<u64>;

    /// Get a block by number, with full transaction objects when `full_tx` is set.
    async fn get_block_by_number(&self, number: u64, full_tx: bool) -> Result<Block>;
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        extract_result(json)
    }
}

/// Pull `result` out of a JSON-RPC response, surfacing an `error` member.
fn extract_result(json: Value) -> Result<Value> {
    if let Some(error) = json.get("error") {
        anyhow::bail!("RPC error: {}", error);
    }

    json.get("result")
        .cloned()
        .context("RPC response missing 'result' field")
}

fn parse_quantity(result: &Value, what: &str) -> Result<u64> {
    let s = result
        .as_str()
        .with_context(|| format!("{} response is not a string", what))?;
    parse_hex_u64(s).with_context(|| format!("Failed to parse {}", what))
}

fn parse_block(result: Value, number: u64) -> Result<Block> {
    if result.is_null() {
        anyhow::bail!("Block {} not found", number);
    }
    serde_json::from_value(result).with_context(|| format!("Failed to deserialize block {}", number))
}

#[async_trait]
impl RpcGateway for RpcClient {
    async fn get_block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result, "Block number")
    }

    async fn get_tx_count(&self, address: Address, end_block: u64) -> Result<u64> {
        let addr_str = format!("0x{:x}", address);
        let block_str = format!("0x{:x}", end_block);
        let result = self
            .call("eth_getTransactionCount", json!([addr_str, block_str]))
            .await?;
        parse_quantity(&result, "Transaction count")
    }

    async fn get_block_by_number(&self, number: u64, full_tx: bool) -> Result<Block> {
        let block_str = format!("0x{:x}", number);
        let result = self
            .call("eth_getBlockByNumber", json!([block_str, full_tx]))
            .await?;
        parse_block(result, number)
    }
}
