//! Transaction discovery
//!
//! Reconstructs the transactions a watched address sent or received since
//! it was subscribed, using only per-address transaction counts and
//! per-block transaction listings.
//!
//! Both strategies share the same inputs: the subscription baseline
//! `(subscribe_block_number, subscribe_tx_count)` and the current
//! `(tip, tx_count)`. The difference of the two counts is the number of
//! matching transactions to find, and blocks are walked from the tip
//! downward so the scan can stop as soon as that many have been seen.
//!
//! - [`ConcurrentScanner`] fetches blocks in parallel and keeps nothing
//!   between calls.
//! - [`MemoizingScanner`] walks blocks one at a time, stores what it finds,
//!   and on later calls only scans what is newer than the last stored
//!   transaction.

pub mod concurrent;
pub mod memoizing;

#[cfg(test)]
pub(crate) mod mock;

pub use concurrent::ConcurrentScanner;
pub use memoizing::MemoizingScanner;

use crate::error::DiscoveryError;
use crate::records::{matching_transactions_rev, Subscriber, TransactionRecord};
use crate::rpc::RpcGateway;
use crate::store::{BlockStore, SubscriberStore};
use alloy_primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

/// Operations exposed to callers such as the CLI or the poller.
#[async_trait]
pub trait TransactionDiscovery: Send + Sync {
    /// Record the current block and transaction count of `address` as its baseline.
    async fn subscribe(&self, address: Address) -> Result<Subscriber, DiscoveryError>;

    /// Get the transactions of `address` since it was subscribed, oldest first.
    async fn get_transactions(
        &self,
        address: Address,
    ) -> Result<Vec<TransactionRecord>, DiscoveryError>;

    /// Get the last checkpointed block, 0 if no scan has run yet.
    async fn get_current_block(&self) -> Result<u64, DiscoveryError>;
}

/// Establish the baseline for `address`.
///
/// A baseline already stored for the address is replaced.
pub(crate) async fn subscribe<G, S>(
    gateway: &G,
    store: &S,
    address: Address,
) -> Result<Subscriber, DiscoveryError>
where
    G: RpcGateway + ?Sized,
    S: SubscriberStore + ?Sized,
{
    let block_number = gateway
        .get_block_number()
        .await
        .map_err(DiscoveryError::CurrentBlock)?;

    let tx_count = gateway
        .get_tx_count(address, block_number)
        .await
        .map_err(DiscoveryError::Gateway)?;

    let subscriber = Subscriber {
        address,
        subscribe_block_number: block_number,
        subscribe_tx_count: tx_count,
    };
    store
        .add_subscriber(&subscriber)
        .map_err(DiscoveryError::Persistence)?;

    info!(
        "Subscribed {:?} at block {} (tx count {})",
        address, block_number, tx_count
    );
    Ok(subscriber)
}

/// Inputs of one discovery call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanWindow {
    pub subscriber: Subscriber,
    /// Chain tip observed for this call
    pub tip: u64,
    /// Matching transactions since the baseline
    pub tx_count: u64,
}

/// Load the baseline and query the node for the current tip and count.
pub(crate) async fn scan_window<G, S>(
    gateway: &G,
    store: &S,
    address: Address,
) -> Result<ScanWindow, DiscoveryError>
where
    G: RpcGateway + ?Sized,
    S: SubscriberStore + ?Sized,
{
    let subscriber = store
        .get_subscriber(address)
        .map_err(DiscoveryError::Persistence)?
        .ok_or(DiscoveryError::NotSubscribed(address))?;

    let tip = gateway
        .get_block_number()
        .await
        .map_err(DiscoveryError::Gateway)?;

    let current = gateway
        .get_tx_count(address, tip)
        .await
        .map_err(DiscoveryError::Gateway)?;

    let tx_count = current
        .checked_sub(subscriber.subscribe_tx_count)
        .ok_or(DiscoveryError::CountRegressed {
            subscribed: subscriber.subscribe_tx_count,
            current,
        })?;

    info!(
        "Scanning {:?}: blocks {}..={} for {} transactions",
        address, subscriber.subscribe_block_number, tip, tx_count
    );

    Ok(ScanWindow {
        subscriber,
        tip,
        tx_count,
    })
}

/// Fetch one block and return its transactions involving `address`, newest first.
///
/// The block at `tip` also advances the checkpoint.
pub(crate) async fn fetch_block_matches<G, S>(
    gateway: &G,
    store: &S,
    address: Address,
    block_number: u64,
    tip: u64,
) -> Result<Vec<TransactionRecord>, DiscoveryError>
where
    G: RpcGateway + ?Sized,
    S: BlockStore + ?Sized,
{
    let block = gateway
        .get_block_by_number(block_number, true)
        .await
        .with_context(|| format!("Failed to fetch block {}", block_number))
        .map_err(DiscoveryError::Gateway)?;

    if block_number == tip {
        store
            .set_max_current_block(block_number)
            .map_err(DiscoveryError::Persistence)?;
        debug!("Checkpoint advanced to block {}", block_number);
    }

    let matches = matching_transactions_rev(&block, address);
    debug!(
        "Block {}: {} of {} transactions match",
        block_number,
        matches.len(),
        block.transactions.len()
    );
    Ok(matches)
}

pub(crate) fn current_block<S>(store: &S) -> Result<u64, DiscoveryError>
where
    S: BlockStore + ?Sized,
{
    Ok(store
        .get_current_block()
        .map_err(DiscoveryError::Persistence)?
        .unwrap_or(0))
}
