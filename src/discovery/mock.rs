//! In-memory chain used by discovery tests.

use crate::rpc::RpcGateway;
use crate::types::{Block, Transaction};
use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

pub(crate) fn addr() -> Address {
    Address::repeat_byte(0xaa)
}

pub(crate) fn other() -> Address {
    Address::repeat_byte(0xbb)
}

#[derive(Default)]
struct ChainState {
    tip: u64,
    blocks: BTreeMap<u64, Vec<Transaction>>,
    failing_blocks: HashSet<u64>,
    fail_block_number: bool,
    fail_tx_count: bool,
    fetched: Vec<u64>,
}

/// Fake node: counts every transaction an address sent or received and
/// serves blocks with full transactions.
pub(crate) struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub(crate) fn new(tip: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                tip,
                ..ChainState::default()
            }),
        }
    }

    /// Append a transaction to `block`, returning its index.
    pub(crate) fn add_tx(&self, block: u64, from: Address, to: Address) -> u64 {
        let mut state = self.state.lock().unwrap();
        let txs = state.blocks.entry(block).or_default();
        let index = txs.len() as u64;
        let mut hash = [0u8; 32];
        hash[16..24].copy_from_slice(&block.to_be_bytes());
        hash[24..].copy_from_slice(&index.to_be_bytes());
        txs.push(Transaction {
            hash: B256::from(hash),
            block_hash: Some(block_hash(block)),
            block_number: Some(block),
            transaction_index: Some(index),
            from,
            to: Some(to),
            value: U256::from(1_000u64),
            gas_price: Some(U256::from(1_000_000_000u64)),
            gas: U256::from(21_000u64),
            input: Bytes::new(),
            nonce: index,
            v: Some(U256::from(1u64)),
            r: Some(U256::from(2u64)),
            s: Some(U256::from(3u64)),
        });
        index
    }

    pub(crate) fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    pub(crate) fn fail_block(&self, block: u64) {
        self.state.lock().unwrap().failing_blocks.insert(block);
    }

    pub(crate) fn fail_block_number(&self, fail: bool) {
        self.state.lock().unwrap().fail_block_number = fail;
    }

    pub(crate) fn fail_tx_count(&self, fail: bool) {
        self.state.lock().unwrap().fail_tx_count = fail;
    }

    /// Block numbers fetched since the last call, in fetch order.
    pub(crate) fn take_fetched(&self) -> Vec<u64> {
        std::mem::take(&mut self.state.lock().unwrap().fetched)
    }

    /// Every transaction involving `address` in `from..=to`, oldest first,
    /// as (block, index) pairs.
    pub(crate) fn matching_positions(&self, address: Address, from: u64, to: u64) -> Vec<(u64, u64)> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .range(from..=to)
            .flat_map(|(number, txs)| {
                txs.iter()
                    .enumerate()
                    .filter(|(_, tx)| tx.involves(address))
                    .map(move |(i, _)| (*number, i as u64))
            })
            .collect()
    }
}

fn block_hash(number: u64) -> B256 {
    let mut hash = [0xffu8; 32];
    hash[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(hash)
}

#[async_trait]
impl RpcGateway for MockChain {
    async fn get_block_number(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_block_number {
            anyhow::bail!("connection refused");
        }
        Ok(state.tip)
    }

    async fn get_tx_count(&self, address: Address, end_block: u64) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_tx_count {
            anyhow::bail!("invalid address");
        }
        Ok(state
            .blocks
            .range(..=end_block)
            .flat_map(|(_, txs)| txs.iter())
            .filter(|tx| tx.involves(address))
            .count() as u64)
    }

    async fn get_block_by_number(&self, number: u64, _full_tx: bool) -> Result<Block> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(number);
        if state.failing_blocks.contains(&number) {
            anyhow::bail!("node unavailable");
        }
        if number > state.tip {
            anyhow::bail!("Block {} not found", number);
        }
        Ok(Block {
            number,
            hash: block_hash(number),
            transactions: state.blocks.get(&number).cloned().unwrap_or_default(),
        })
    }
}
