//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Block numbers and indices are big-endian so RocksDB's lexicographic
//! order matches chain order.

use alloy_primitives::Address;
use anyhow::Result;

/// Meta ID for the checkpointed current block.
pub const META_CURRENT_BLOCK: u8 = 0x01;

/// Encode a subscriber key.
///
/// Format: byte 'U' (0x55) + address (20 bytes)
/// Total length: 21 bytes
pub fn encode_subscriber_key(addr: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(b'U');
    key.extend_from_slice(addr.as_slice());
    key
}

/// Encode the prefix shared by every transaction key of an address.
///
/// Format: byte 'T' (0x54) + address (20 bytes)
pub fn encode_transaction_prefix(addr: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(b'T');
    key.extend_from_slice(addr.as_slice());
    key
}

/// Encode a transaction key.
///
/// Format: byte 'T' (0x54) + address (20 bytes) + block_number (8 bytes, big-endian)
///         + transaction_index (8 bytes, big-endian)
/// Total length: 37 bytes
pub fn encode_transaction_key(addr: Address, block: u64, index: u64) -> Vec<u8> {
    let mut key = encode_transaction_prefix(addr);
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Decode a transaction key into (address, block_number, transaction_index).
pub fn decode_transaction_key(key: &[u8]) -> Result<(Address, u64, u64)> {
    if key.len() != 37 || key[0] != b'T' {
        anyhow::bail!("Invalid transaction key (len {})", key.len());
    }
    let addr = Address::from_slice(&key[1..21]);
    let block = u64::from_be_bytes(key[21..29].try_into()?);
    let index = u64::from_be_bytes(key[29..37].try_into()?);
    Ok((addr, block, index))
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
///
/// Meta IDs:
/// - 0x01: current block checkpoint
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}
