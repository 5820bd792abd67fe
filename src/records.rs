//! Record types for subscriptions and discovered transactions
//!
//! These structs represent the data stored in the state store.
//! They use postcard for binary serialization, which is compact and deterministic.

use crate::types::{Block, Transaction};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Subscription baseline for a watched address.
///
/// Captured once when the address is subscribed. Discovery never scans
/// below `subscribe_block_number` and reports exactly the transactions
/// counted above `subscribe_tx_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub address: Address,
    /// Chain tip at subscription time
    pub subscribe_block_number: u64,
    /// Transaction count of the address up to `subscribe_block_number`
    pub subscribe_tx_count: u64,
}

/// A transaction that involves a watched address.
///
/// Owned value copied out of a fetched block. Past transactions are final,
/// so a stored record never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub block_hash: B256,
    pub block_number: u64,
    pub from: Address,
    /// None for contract creation
    pub to: Option<Address>,
    pub hash: B256,
    pub input: Bytes,
    pub nonce: u64,
    pub transaction_index: u64,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

impl TransactionRecord {
    /// Build a record from the transaction at `position` inside `block`.
    ///
    /// Position fields omitted by the node are taken from the block.
    pub fn from_block_tx(block: &Block, position: usize, tx: &Transaction) -> Self {
        Self {
            block_hash: tx.block_hash.unwrap_or(block.hash),
            block_number: tx.block_number.unwrap_or(block.number),
            from: tx.from,
            to: tx.to,
            hash: tx.hash,
            input: tx.input.clone(),
            nonce: tx.nonce,
            transaction_index: tx.transaction_index.unwrap_or(position as u64),
            value: tx.value,
            gas: tx.gas,
            gas_price: tx.gas_price.unwrap_or(U256::ZERO),
            v: tx.v.unwrap_or(U256::ZERO),
            r: tx.r.unwrap_or(U256::ZERO),
            s: tx.s.unwrap_or(U256::ZERO),
        }
    }

    /// Chain position used for chronological ordering.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.transaction_index)
    }
}

/// Collect the transactions in `block` that involve `address`, newest first.
///
/// Walks the block in reverse so that, combined with a descending block
/// scan, the overall output stays newest-first.
pub fn matching_transactions_rev(block: &Block, address: Address) -> Vec<TransactionRecord> {
    block
        .transactions
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, tx)| tx.involves(address))
        .map(|(position, tx)| TransactionRecord::from_block_tx(block, position, tx))
        .collect()
}

/// Reverse a newest-first list in place so it reads oldest first.
pub fn reverse_in_place(txs: &mut [TransactionRecord]) {
    txs.reverse();
}

/// Sort by (block number, transaction index).
pub fn sort_chronological(txs: &mut [TransactionRecord]) {
    txs.sort_by_key(TransactionRecord::position);
}

/// Check that `txs` is non-decreasing by (block number, transaction index).
pub fn is_chronological(txs: &[TransactionRecord]) -> bool {
    txs.windows(2).all(|w| w[0].position() <= w[1].position())
}
