//! Main watcher loop
//!
//! Subscribes every address of a watchlist, then polls discovery for each
//! of them and logs the transactions that appeared since the last poll.

use crate::config::load_watchlist;
use crate::discovery::TransactionDiscovery;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Polls transaction discovery for a fixed set of addresses.
pub struct Watcher {
    discovery: Box<dyn TransactionDiscovery>,
    watchlist: Vec<Address>,
    /// Transactions already reported per address
    seen: HashMap<Address, usize>,
    interval: Duration,
}

impl Watcher {
    /// Create a new watcher.
    pub fn new(discovery: Box<dyn TransactionDiscovery>, interval: Duration) -> Self {
        Self {
            discovery,
            watchlist: Vec::new(),
            seen: HashMap::new(),
            interval,
        }
    }

    /// Load the watchlist file and subscribe its addresses.
    pub async fn initialize(&mut self, watchlist_path: &Path) -> Result<()> {
        info!("Initializing watcher...");
        let addresses = load_watchlist(watchlist_path).context("Failed to load watchlist")?;
        info!("Loaded {} addresses to watch", addresses.len());
        self.watch(addresses).await
    }

    /// Subscribe every address that has no baseline yet.
    ///
    /// Addresses already subscribed keep their baseline; what they have
    /// accumulated so far counts as already reported.
    pub async fn watch(&mut self, addresses: Vec<Address>) -> Result<()> {
        for addr in &addresses {
            match self.discovery.get_transactions(*addr).await {
                Ok(txs) => {
                    info!("Resuming {:?} with {} known transactions", addr, txs.len());
                    self.seen.insert(*addr, txs.len());
                }
                Err(e) if e.is_not_subscribed() => {
                    let sub = self
                        .discovery
                        .subscribe(*addr)
                        .await
                        .with_context(|| format!("Failed to subscribe {:?}", addr))?;
                    info!(
                        "Subscribed {:?} at block {}",
                        addr, sub.subscribe_block_number
                    );
                    self.seen.insert(*addr, 0);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to initialize {:?}", addr));
                }
            }
        }
        self.watchlist = addresses;
        Ok(())
    }

    /// Run discovery once for every watched address.
    ///
    /// Returns how many new transactions were reported. A failing address
    /// is logged and skipped; the next poll retries it.
    pub async fn poll_once(&mut self) -> usize {
        let mut reported = 0;
        for addr in &self.watchlist {
            let txs = match self.discovery.get_transactions(*addr).await {
                Ok(txs) => txs,
                Err(e) => {
                    warn!("Discovery failed for {:?}: {:#}", addr, e);
                    continue;
                }
            };

            let seen = self.seen.entry(*addr).or_insert(0);
            for tx in txs.iter().skip(*seen) {
                info!(
                    "New TX {:?} in block {} (index {}): from={:?}, to={:?}, value={}",
                    tx.hash, tx.block_number, tx.transaction_index, tx.from, tx.to, tx.value
                );
            }
            reported += txs.len().saturating_sub(*seen);
            *seen = txs.len();
        }
        reported
    }

    /// Run the main watcher loop.
    ///
    /// Polls every `interval` until the future is dropped.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting watcher loop...");

        loop {
            let reported = self.poll_once().await;
            match self.discovery.get_current_block().await {
                Ok(block) => info!("Poll done: {} new transactions, checkpoint {}", reported, block),
                Err(e) => warn!("Failed to read checkpoint: {:#}", e),
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::mock::{addr, other, MockChain};
    use crate::discovery::MemoizingScanner;
    use crate::store::MemoryStore;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn watcher(chain: &Arc<MockChain>) -> Watcher {
        let discovery = MemoizingScanner::new(Arc::clone(chain), Arc::new(MemoryStore::new()));
        Watcher::new(Box::new(discovery), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_poll_reports_only_new_transactions() {
        let chain = Arc::new(MockChain::new(3));
        chain.add_tx(2, addr(), other());
        let mut watcher = watcher(&chain);
        watcher.watch(vec![addr(), other()]).await.unwrap();

        assert_eq!(watcher.poll_once().await, 0);

        chain.add_tx(5, addr(), other());
        chain.set_tip(5);
        // Both watched addresses are party to the transaction
        assert_eq!(watcher.poll_once().await, 2);
        assert_eq!(watcher.poll_once().await, 0);
    }

    #[tokio::test]
    async fn test_failing_poll_is_skipped() {
        let chain = Arc::new(MockChain::new(3));
        let mut watcher = watcher(&chain);
        watcher.watch(vec![addr()]).await.unwrap();

        chain.add_tx(4, other(), addr());
        chain.set_tip(4);
        chain.fail_block(4);
        assert_eq!(watcher.poll_once().await, 0);
    }

    #[tokio::test]
    async fn test_initialize_from_file() {
        let chain = Arc::new(MockChain::new(3));
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "0x{:x}", addr()).unwrap();
        file.flush().unwrap();

        let mut watcher = watcher(&chain);
        watcher.initialize(file.path()).await.unwrap();
        assert_eq!(watcher.watchlist, vec![addr()]);
    }
}
