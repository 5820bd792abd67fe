//! Concurrent discovery strategy
//!
//! A fixed pool of workers pulls block numbers newest-first from a shared
//! queue and reports each block's matches to a coordinator. The coordinator
//! stops the pool once the run of finished blocks starting at the tip holds
//! enough matches, or as soon as any block fails.
//!
//! Nothing is stored between calls besides the checkpoint. Because the
//! result is trimmed to the newest `tx_count` matches, transactions of the
//! subscription block that predate the baseline fall off without the
//! last-seen index the memoizing strategy relies on.

use super::{current_block, fetch_block_matches, scan_window, subscribe, TransactionDiscovery};
use crate::config::ScanConfig;
use crate::error::DiscoveryError;
use crate::records::{sort_chronological, Subscriber, TransactionRecord};
use crate::rpc::RpcGateway;
use crate::store::{BlockStore, SubscriberStore};
use alloy_primitives::Address;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type BlockOutcome = (u64, Result<Vec<TransactionRecord>, DiscoveryError>);

/// Discovery that fetches up to `max_in_flight` blocks at once.
///
/// Dropping the future returned by `get_transactions` aborts every
/// in-flight block task.
pub struct ConcurrentScanner<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
    config: ScanConfig,
}

impl<G, S> ConcurrentScanner<G, S>
where
    G: RpcGateway + 'static,
    S: SubscriberStore + BlockStore + 'static,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>, config: ScanConfig) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    async fn scan(
        &self,
        address: Address,
        lowest: u64,
        tip: u64,
        tx_count: u64,
    ) -> Result<Vec<TransactionRecord>, DiscoveryError> {
        if tx_count == 0 {
            return Ok(Vec::new());
        }
        if tip < lowest {
            warn!(
                "Tip {} is below subscription block {}, nothing to scan",
                tip, lowest
            );
            return Ok(Vec::new());
        }

        let block_count = tip - lowest + 1;
        let workers = (self.config.max_in_flight() as u64).min(block_count) as usize;
        let queue = Arc::new(Mutex::new(lowest..=tip));
        let stop = Arc::new(AtomicBool::new(false));
        let (results_tx, mut results_rx) = mpsc::channel::<BlockOutcome>(workers);

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            tasks.spawn(scan_worker(
                Arc::clone(&self.gateway),
                Arc::clone(&self.store),
                Arc::clone(&queue),
                Arc::clone(&stop),
                results_tx.clone(),
                address,
                tip,
            ));
        }
        drop(results_tx);
        debug!("Started {} block workers for {} blocks", workers, block_count);

        let mut found: BTreeMap<u64, Vec<TransactionRecord>> = BTreeMap::new();
        let mut errors = Vec::new();
        // Next block of the unbroken run of finished blocks starting at the tip
        let mut frontier = Some(tip);
        let mut frontier_matches = 0u64;

        while let Some((block_number, outcome)) = results_rx.recv().await {
            match outcome {
                Ok(matches) => {
                    found.insert(block_number, matches);
                }
                Err(e) => {
                    errors.push(e);
                    stop.store(true, Ordering::Release);
                    continue;
                }
            }

            while let Some(next) = frontier {
                let Some(matches) = found.get(&next) else {
                    break;
                };
                frontier_matches += matches.len() as u64;
                frontier = if next > lowest { Some(next - 1) } else { None };
            }

            if frontier_matches >= tx_count && !stop.swap(true, Ordering::AcqRel) {
                debug!(
                    "Found {} matches in blocks {}..={}, stopping workers",
                    frontier_matches,
                    frontier.map_or(lowest, |b| b + 1),
                    tip
                );
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                errors.push(DiscoveryError::Task(e.to_string()));
            }
        }

        if !errors.is_empty() {
            warn!(
                "Discarding scan of {:?}: {} block task(s) failed",
                address,
                errors.len()
            );
            return Err(DiscoveryError::Aggregated(errors));
        }

        let mut txs: Vec<TransactionRecord> = found
            .into_values()
            .rev()
            .flatten()
            .take(tx_count as usize)
            .collect();
        if (txs.len() as u64) < tx_count {
            warn!(
                "Expected {} transactions for {:?}, found {}",
                tx_count,
                address,
                txs.len()
            );
        }
        sort_chronological(&mut txs);

        info!("Discovered {} transactions for {:?}", txs.len(), address);
        Ok(txs)
    }
}

/// Pull block numbers until the queue is empty or the coordinator says stop.
async fn scan_worker<G, S>(
    gateway: Arc<G>,
    store: Arc<S>,
    queue: Arc<Mutex<RangeInclusive<u64>>>,
    stop: Arc<AtomicBool>,
    results: mpsc::Sender<BlockOutcome>,
    address: Address,
    tip: u64,
) where
    G: RpcGateway + 'static,
    S: BlockStore + 'static,
{
    while !stop.load(Ordering::Acquire) {
        let Some(block_number) = next_block(&queue) else {
            break;
        };
        let outcome = fetch_block_matches(&*gateway, &*store, address, block_number, tip).await;
        if results.send((block_number, outcome)).await.is_err() {
            break;
        }
    }
}

fn next_block(queue: &Mutex<RangeInclusive<u64>>) -> Option<u64> {
    queue.lock().ok()?.next_back()
}

#[async_trait]
impl<G, S> TransactionDiscovery for ConcurrentScanner<G, S>
where
    G: RpcGateway + 'static,
    S: SubscriberStore + BlockStore + 'static,
{
    async fn subscribe(&self, address: Address) -> Result<Subscriber, DiscoveryError> {
        subscribe(&*self.gateway, &*self.store, address).await
    }

    async fn get_transactions(
        &self,
        address: Address,
    ) -> Result<Vec<TransactionRecord>, DiscoveryError> {
        let window = scan_window(&*self.gateway, &*self.store, address).await?;
        self.scan(
            address,
            window.subscriber.subscribe_block_number,
            window.tip,
            window.tx_count,
        )
        .await
    }

    async fn get_current_block(&self) -> Result<u64, DiscoveryError> {
        current_block(&*self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::{addr, other, MockChain};
    use super::*;
    use crate::records::is_chronological;
    use crate::store::MemoryStore;

    fn scanner(
        chain: &Arc<MockChain>,
        store: &Arc<MemoryStore>,
        max_in_flight: usize,
    ) -> ConcurrentScanner<MockChain, MemoryStore> {
        ConcurrentScanner::new(
            Arc::clone(chain),
            Arc::clone(store),
            ScanConfig::new(max_in_flight),
        )
    }

    fn positions(txs: &[TransactionRecord]) -> Vec<(u64, u64)> {
        txs.iter().map(TransactionRecord::position).collect()
    }

    /// Chain subscribed at block 10 with activity in blocks 8..=30.
    async fn busy_chain(
        max_in_flight: usize,
    ) -> (Arc<MockChain>, Arc<MemoryStore>, ConcurrentScanner<MockChain, MemoryStore>) {
        let chain = Arc::new(MockChain::new(10));
        chain.add_tx(8, addr(), other());
        chain.add_tx(10, other(), addr());
        chain.add_tx(10, other(), other());
        let store = Arc::new(MemoryStore::new());
        let engine = scanner(&chain, &store, max_in_flight);
        engine.subscribe(addr()).await.unwrap();

        for block in 11..=30 {
            chain.add_tx(block, other(), other());
            if block % 3 == 0 {
                chain.add_tx(block, addr(), other());
            }
            if block % 4 == 0 {
                chain.add_tx(block, other(), addr());
            }
        }
        chain.set_tip(30);
        chain.take_fetched();
        (chain, store, engine)
    }

    #[tokio::test]
    async fn test_no_new_blocks_returns_empty() {
        let chain = Arc::new(MockChain::new(100));
        for block in [20, 50, 99, 100, 100] {
            chain.add_tx(block, addr(), other());
        }
        let store = Arc::new(MemoryStore::new());
        let engine = scanner(&chain, &store, 4);

        let sub = engine.subscribe(addr()).await.unwrap();
        assert_eq!((sub.subscribe_block_number, sub.subscribe_tx_count), (100, 5));

        let txs = engine.get_transactions(addr()).await.unwrap();
        assert!(txs.is_empty());
        assert!(chain.take_fetched().is_empty());
    }

    #[tokio::test]
    async fn test_finds_exact_delta_in_chronological_order() {
        let (chain, _store, engine) = busy_chain(4).await;

        let txs = engine.get_transactions(addr()).await.unwrap();
        let expected = chain.matching_positions(addr(), 11, 30);
        assert_eq!(positions(&txs), expected);
        assert!(is_chronological(&txs));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_result_for_any_pool_size() {
        for max_in_flight in [1, 3, 64] {
            let (chain, _store, engine) = busy_chain(max_in_flight).await;
            let txs = engine.get_transactions(addr()).await.unwrap();
            assert_eq!(positions(&txs), chain.matching_positions(addr(), 11, 30));
        }
    }

    #[tokio::test]
    async fn test_subscription_block_matches_are_excluded() {
        let (_chain, _store, engine) = busy_chain(8).await;

        let txs = engine.get_transactions(addr()).await.unwrap();
        assert!(txs.iter().all(|tx| tx.block_number > 10));
    }

    #[tokio::test]
    async fn test_any_failed_block_discards_everything() {
        let (chain, _store, engine) = busy_chain(4).await;
        chain.fail_block(15);

        let err = engine.get_transactions(addr()).await.unwrap_err();
        match &err {
            DiscoveryError::Aggregated(errors) => assert_eq!(errors.len(), 1),
            unexpected => panic!("expected aggregated error, got {:?}", unexpected),
        }
        let message = err.to_string();
        assert!(message.starts_with("Error: Failed to fetch block 15"));
        assert!(message.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_stops_fetching_once_enough_matches_found() {
        let chain = Arc::new(MockChain::new(10));
        let store = Arc::new(MemoryStore::new());
        let engine = scanner(&chain, &store, 1);
        engine.subscribe(addr()).await.unwrap();

        chain.add_tx(60, addr(), other());
        chain.set_tip(60);
        chain.take_fetched();

        let txs = engine.get_transactions(addr()).await.unwrap();
        assert_eq!(positions(&txs), vec![(60, 0)]);
        let fetched = chain.take_fetched();
        assert_eq!(fetched[0], 60);
        assert!(fetched.len() < 5, "fetched {:?}", fetched);
    }

    #[tokio::test]
    async fn test_checkpoints_tip() {
        let (_chain, _store, engine) = busy_chain(4).await;
        assert_eq!(engine.get_current_block().await.unwrap(), 0);

        engine.get_transactions(addr()).await.unwrap();
        assert_eq!(engine.get_current_block().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_zero_pool_size_scans_with_one_worker() {
        let (chain, _store, engine) = busy_chain(0).await;
        let txs = engine.get_transactions(addr()).await.unwrap();
        assert_eq!(positions(&txs), chain.matching_positions(addr(), 11, 30));
    }

    /// Memory store whose checkpoint writes always fail.
    struct ReadOnlyCheckpoint(MemoryStore);

    impl SubscriberStore for ReadOnlyCheckpoint {
        fn add_subscriber(&self, subscriber: &Subscriber) -> anyhow::Result<()> {
            self.0.add_subscriber(subscriber)
        }

        fn get_subscriber(&self, addr: Address) -> anyhow::Result<Option<Subscriber>> {
            self.0.get_subscriber(addr)
        }
    }

    impl BlockStore for ReadOnlyCheckpoint {
        fn set_max_current_block(&self, _block: u64) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn get_current_block(&self) -> anyhow::Result<Option<u64>> {
            self.0.get_current_block()
        }
    }

    #[tokio::test]
    async fn test_tip_checkpoint_failure_fails_the_batch() {
        let chain = Arc::new(MockChain::new(10));
        let store = Arc::new(ReadOnlyCheckpoint(MemoryStore::new()));
        let engine = ConcurrentScanner::new(Arc::clone(&chain), store, ScanConfig::new(4));
        engine.subscribe(addr()).await.unwrap();

        chain.add_tx(12, addr(), other());
        chain.add_tx(14, other(), addr());
        chain.set_tip(14);

        let err = engine.get_transactions(addr()).await.unwrap_err();
        match &err {
            DiscoveryError::Aggregated(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(errors[0], DiscoveryError::Persistence(_)));
            }
            unexpected => panic!("expected aggregated error, got {:?}", unexpected),
        }
        assert_eq!(err.to_string(), "Error: disk full\n");
        assert_eq!(engine.get_current_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_not_subscribed() {
        let chain = Arc::new(MockChain::new(10));
        let store = Arc::new(MemoryStore::new());
        let engine = scanner(&chain, &store, 4);

        let err = engine.get_transactions(addr()).await.unwrap_err();
        assert!(err.is_not_subscribed());
    }
}
