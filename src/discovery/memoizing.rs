//! Memoizing discovery strategy
//!
//! Walks blocks one at a time from the tip down and stores every match, so
//! each call only has to scan what is newer than the last stored
//! transaction. Past transactions are final, which is what makes keeping
//! them safe.
//!
//! The oldest block of a scan may hold transactions a previous call already
//! stored. Matches there at or below the last stored transaction's index
//! are skipped.
//!
//! Only stored transactions after the subscription block count toward the
//! quota, so re-subscribing starts a fresh delta while earlier history
//! stays in the store.

use super::{current_block, fetch_block_matches, scan_window, subscribe, TransactionDiscovery};
use crate::error::DiscoveryError;
use crate::records::{reverse_in_place, Subscriber, TransactionRecord};
use crate::rpc::RpcGateway;
use crate::store::{BlockStore, SubscriberStore, TransactionStore};
use alloy_primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sequential discovery that remembers what it found.
pub struct MemoizingScanner<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
}

impl<G, S> MemoizingScanner<G, S>
where
    G: RpcGateway,
    S: SubscriberStore + BlockStore + TransactionStore,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>) -> Self {
        Self { gateway, store }
    }

    /// Scan for transactions newer than those already stored.
    ///
    /// Returns them oldest first. Nothing is written.
    async fn discover_new(
        &self,
        address: Address,
    ) -> Result<Vec<TransactionRecord>, DiscoveryError> {
        let window = scan_window(&*self.gateway, &*self.store, address).await?;

        let last_tx = self
            .store
            .get_last_transaction(address)
            .map_err(DiscoveryError::Persistence)?;
        let stored = self
            .store
            .count_transactions_after(address, window.subscriber.subscribe_block_number)
            .map_err(DiscoveryError::Persistence)?;

        let mut remaining = window.tx_count.saturating_sub(stored);
        let lowest = last_tx.as_ref().map_or(
            window.subscriber.subscribe_block_number,
            |tx| tx.block_number.max(window.subscriber.subscribe_block_number),
        );
        debug!(
            "{:?}: {} stored, {} to find in blocks {}..={}",
            address, stored, remaining, lowest, window.tip
        );

        let mut discovered = Vec::new();
        let mut block_number = window.tip;
        while remaining > 0 && block_number >= lowest {
            let mut matches =
                fetch_block_matches(&*self.gateway, &*self.store, address, block_number, window.tip)
                    .await?;

            if block_number == lowest {
                if let Some(last) = &last_tx {
                    matches.retain(|tx| tx.position() > last.position());
                }
            }

            for tx in matches {
                if remaining == 0 {
                    break;
                }
                discovered.push(tx);
                remaining -= 1;
            }

            if block_number == 0 {
                break;
            }
            block_number -= 1;
        }

        if remaining > 0 {
            warn!(
                "Expected {} more transactions for {:?} down to block {}, found {}",
                remaining + discovered.len() as u64,
                address,
                lowest,
                discovered.len()
            );
        }

        reverse_in_place(&mut discovered);
        Ok(discovered)
    }
}

#[async_trait]
impl<G, S> TransactionDiscovery for MemoizingScanner<G, S>
where
    G: RpcGateway,
    S: SubscriberStore + BlockStore + TransactionStore,
{
    async fn subscribe(&self, address: Address) -> Result<Subscriber, DiscoveryError> {
        subscribe(&*self.gateway, &*self.store, address).await
    }

    async fn get_transactions(
        &self,
        address: Address,
    ) -> Result<Vec<TransactionRecord>, DiscoveryError> {
        let discovered = self.discover_new(address).await?;

        if !discovered.is_empty() {
            self.store
                .add_transactions(address, &discovered)
                .map_err(DiscoveryError::Persistence)?;
            info!(
                "Stored {} new transactions for {:?}",
                discovered.len(),
                address
            );
        }

        self.store
            .get_transactions(address)
            .map_err(DiscoveryError::Persistence)
    }

    async fn get_current_block(&self) -> Result<u64, DiscoveryError> {
        current_block(&*self.store)
    }
}
