//! Persistence traits and their RocksDB / in-memory implementations
//!
//! Stores subscription baselines, the current block checkpoint, and the
//! transactions discovered for each address.
//! Uses RocksDB with column families for efficient organization.

use crate::keys::{
    decode_transaction_key, encode_meta_key, encode_subscriber_key, encode_transaction_key,
    encode_transaction_prefix, META_CURRENT_BLOCK,
};
use crate::records::{Subscriber, TransactionRecord};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Subscription baselines.
pub trait SubscriberStore: Send + Sync {
    /// Store a subscriber, replacing any previous baseline for the address.
    fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()>;

    /// Get the subscriber for an address, `None` if it was never subscribed.
    fn get_subscriber(&self, addr: Address) -> Result<Option<Subscriber>>;
}

/// Current block checkpoint.
pub trait BlockStore: Send + Sync {
    /// Advance the checkpoint to `block`. Never moves it backward.
    fn set_max_current_block(&self, block: u64) -> Result<()>;

    /// Get the checkpoint, `None` if no scan has recorded one yet.
    fn get_current_block(&self) -> Result<Option<u64>>;
}

/// Transactions discovered per address.
pub trait TransactionStore: Send + Sync {
    /// Get the newest stored transaction for an address.
    fn get_last_transaction(&self, addr: Address) -> Result<Option<TransactionRecord>>;

    /// Append transactions for an address.
    ///
    /// Records are keyed by (block number, transaction index), so adding
    /// the same transaction twice stores it once.
    fn add_transactions(&self, addr: Address, txs: &[TransactionRecord]) -> Result<()>;

    /// Get every stored transaction for an address, oldest first.
    fn get_transactions(&self, addr: Address) -> Result<Vec<TransactionRecord>>;

    /// Number of stored transactions for an address in blocks after `block`.
    fn count_transactions_after(&self, addr: Address, block: u64) -> Result<u64>;
}

/// RocksDB-backed implementation of the store traits.
///
/// Uses column families to organize different types of data:
/// - subscribers: subscription baselines
/// - transactions: discovered transactions, keyed chronologically per address
/// - meta: metadata (current block checkpoint)
pub struct RocksStateStore {
    db: DB,
    /// Serializes the read-compare-write of the checkpoint.
    checkpoint_lock: Mutex<()>,
}

impl RocksStateStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new("subscribers", Options::default()),
            ColumnFamilyDescriptor::new("transactions", Options::default()),
            ColumnFamilyDescriptor::new("meta", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self {
            db,
            checkpoint_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }
}

impl SubscriberStore for RocksStateStore {
    fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        let cf = self.get_cf("subscribers")?;
        let key = encode_subscriber_key(subscriber.address);
        let value = postcard::to_allocvec(subscriber).context("Failed to serialize subscriber")?;
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to put subscriber")?;
        Ok(())
    }

    fn get_subscriber(&self, addr: Address) -> Result<Option<Subscriber>> {
        let cf = self.get_cf("subscribers")?;
        let key = encode_subscriber_key(addr);
        match self.db.get_cf(cf, &key).context("Failed to get subscriber")? {
            Some(bytes) => {
                let subscriber = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize subscriber")?;
                Ok(Some(subscriber))
            }
            None => Ok(None),
        }
    }
}

impl BlockStore for RocksStateStore {
    fn set_max_current_block(&self, block: u64) -> Result<()> {
        let _guard = self
            .checkpoint_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Checkpoint lock poisoned"))?;
        if let Some(current) = self.get_current_block()? {
            if current >= block {
                return Ok(());
            }
        }
        let cf = self.get_cf("meta")?;
        let key = encode_meta_key(META_CURRENT_BLOCK);
        self.db
            .put_cf(cf, &key, block.to_be_bytes())
            .context("Failed to set current block")?;
        Ok(())
    }

    fn get_current_block(&self) -> Result<Option<u64>> {
        let cf = self.get_cf("meta")?;
        let key = encode_meta_key(META_CURRENT_BLOCK);
        match self.db.get_cf(cf, &key).context("Failed to get current block")? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!("Current block must be 8 bytes (u64), got {}", bytes.len())
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}

impl TransactionStore for RocksStateStore {
    fn get_last_transaction(&self, addr: Address) -> Result<Option<TransactionRecord>> {
        let cf = self.get_cf("transactions")?;
        let prefix = encode_transaction_prefix(addr);
        let upper = encode_transaction_key(addr, u64::MAX, u64::MAX);

        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));

        if let Some(item) = iter.next() {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                return Ok(None);
            }
            let record = postcard::from_bytes(&value)
                .context("Failed to deserialize transaction record")?;
            return Ok(Some(record));
        }

        Ok(None)
    }

    fn add_transactions(&self, addr: Address, txs: &[TransactionRecord]) -> Result<()> {
        let cf = self.get_cf("transactions")?;
        let mut batch = rocksdb::WriteBatch::default();
        for tx in txs {
            let key = encode_transaction_key(addr, tx.block_number, tx.transaction_index);
            let value =
                postcard::to_allocvec(tx).context("Failed to serialize transaction record")?;
            batch.put_cf(cf, &key, &value);
        }
        self.db
            .write(batch)
            .context("Failed to write transactions")?;
        Ok(())
    }

    fn get_transactions(&self, addr: Address) -> Result<Vec<TransactionRecord>> {
        let cf = self.get_cf("transactions")?;
        let prefix = encode_transaction_prefix(addr);

        let mut txs = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;

            // Stop once we leave this address's key range
            if !key.starts_with(&prefix) {
                break;
            }

            let (key_addr, _, _) =
                decode_transaction_key(&key).context("Failed to decode transaction key")?;
            if key_addr != addr {
                continue;
            }

            let record: TransactionRecord = postcard::from_bytes(&value)
                .context("Failed to deserialize transaction record")?;
            txs.push(record);
        }

        Ok(txs)
    }

    fn count_transactions_after(&self, addr: Address, block: u64) -> Result<u64> {
        let Some(first) = block.checked_add(1) else {
            return Ok(0);
        };
        let cf = self.get_cf("transactions")?;
        let prefix = encode_transaction_prefix(addr);
        let start = encode_transaction_key(addr, first, 0);
        let mut count = 0u64;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Default)]
struct MemoryState {
    subscribers: HashMap<Address, Subscriber>,
    current_block: Option<u64>,
    transactions: HashMap<Address, BTreeMap<(u64, u64), TransactionRecord>>,
}

/// In-process implementation of the store traits.
///
/// Nothing survives the process; suited to a long-running poller that
/// does not need a database, and to tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))
    }
}

impl SubscriberStore for MemoryStore {
    fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        self.lock()?
            .subscribers
            .insert(subscriber.address, *subscriber);
        Ok(())
    }

    fn get_subscriber(&self, addr: Address) -> Result<Option<Subscriber>> {
        Ok(self.lock()?.subscribers.get(&addr).copied())
    }
}

impl BlockStore for MemoryStore {
    fn set_max_current_block(&self, block: u64) -> Result<()> {
        let mut state = self.lock()?;
        state.current_block = Some(state.current_block.map_or(block, |cur| cur.max(block)));
        Ok(())
    }

    fn get_current_block(&self) -> Result<Option<u64>> {
        Ok(self.lock()?.current_block)
    }
}

impl TransactionStore for MemoryStore {
    fn get_last_transaction(&self, addr: Address) -> Result<Option<TransactionRecord>> {
        Ok(self
            .lock()?
            .transactions
            .get(&addr)
            .and_then(|txs| txs.values().next_back().cloned()))
    }

    fn add_transactions(&self, addr: Address, txs: &[TransactionRecord]) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state.transactions.entry(addr).or_default();
        for tx in txs {
            stored.insert(tx.position(), tx.clone());
        }
        Ok(())
    }

    fn get_transactions(&self, addr: Address) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .lock()?
            .transactions
            .get(&addr)
            .map(|txs| txs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn count_transactions_after(&self, addr: Address, block: u64) -> Result<u64> {
        let Some(first) = block.checked_add(1) else {
            return Ok(0);
        };
        Ok(self
            .lock()?
            .transactions
            .get(&addr)
            .map_or(0, |txs| txs.range((first, 0)..).count() as u64))
    }
}
