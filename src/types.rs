//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks and transactions returned from
//! `eth_getBlockByNumber` with full transaction objects.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Deserializer};

/// Ethereum block with full transaction details.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// List of transactions in the block, in execution order
    #[serde(rename = "transactions", default)]
    pub transactions: Vec<Transaction>,
}

/// Ethereum transaction as returned inside a full block.
///
/// Position fields (`blockHash`, `blockNumber`, `transactionIndex`) are
/// optional on the wire; [`crate::records::TransactionRecord::from_block_tx`]
/// fills them from the enclosing block when a node omits them.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    #[serde(rename = "blockHash", default, deserialize_with = "deserialize_hex_b256_opt")]
    pub block_hash: Option<B256>,

    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub block_number: Option<u64>,

    #[serde(rename = "transactionIndex", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub transaction_index: Option<u64>,

    /// Sender address (hex string in JSON)
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Recipient address (None for contract creation, hex string in JSON)
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Gas price (effective price for EIP-1559 transactions once mined)
    #[serde(rename = "gasPrice", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub gas_price: Option<U256>,

    /// Gas limit (hex string in JSON)
    #[serde(rename = "gas", deserialize_with = "deserialize_hex_u256")]
    pub gas: U256,

    /// Transaction input data ("0x" for simple transfers)
    #[serde(rename = "input", deserialize_with = "deserialize_hex_bytes")]
    pub input: Bytes,

    /// Transaction nonce (hex string in JSON)
    #[serde(rename = "nonce", deserialize_with = "deserialize_hex_u64")]
    pub nonce: u64,

    /// Signature fields. Missing on some system transactions.
    #[serde(rename = "v", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub v: Option<U256>,

    #[serde(rename = "r", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub r: Option<U256>,

    #[serde(rename = "s", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub s: Option<U256>,
}

impl Transaction {
    /// Check whether `address` sent or received this transaction.
    pub fn involves(&self, address: Address) -> bool {
        self.from == address || self.to == Some(address)
    }
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
pub(crate) fn pad_hex_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a `0x`-prefixed hex quantity into a u64.
pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16)
}

fn parse_hex_u256(s: &str) -> Result<U256, hex::FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    let bytes = hex::decode(pad_hex_string(s))?;
    Ok(U256::from_be_slice(&bytes))
}

fn parse_hex_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(pad_hex_string(s)).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("Expected {} bytes for {}, got {}", N, what, b.len()))
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_hex_u64(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_hex_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u256(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u256_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_hex_u256(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_fixed::<32>(&s, "hash")
        .map(B256::from)
        .map_err(serde::de::Error::custom)
}

fn deserialize_hex_b256_opt<'de, D>(deserializer: D) -> Result<Option<B256>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_hex_fixed::<32>(&s, "hash")
            .map(|b| Some(B256::from(b)))
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_fixed::<20>(&s, "address")
        .map(Address::from)
        .map_err(serde::de::Error::custom)
}

fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if s.strip_prefix("0x").unwrap_or(&s).is_empty() => Ok(None),
        Some(s) => parse_hex_fixed::<20>(&s, "address")
            .map(|b| Some(Address::from(b)))
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        return Ok(Bytes::new());
    }
    hex::decode(pad_hex_string(s))
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
