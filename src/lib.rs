//! txwatch - transaction discovery for watched Ethereum addresses
//!
//! Nodes expose per-address transaction counts and per-block transaction
//! listings but no "transactions by address" query. This library recovers
//! the transactions an address sent or received since it was subscribed,
//! by comparing transaction counts and scanning blocks backward from the tip.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;

// Discovery modules
pub mod config;
pub mod discovery;
pub mod error;
pub mod rpc;
pub mod types;
pub mod watcher;

// Re-export the main types for convenience
pub use discovery::{ConcurrentScanner, MemoizingScanner, TransactionDiscovery};
pub use error::DiscoveryError;
pub use records::{Subscriber, TransactionRecord};
pub use rpc::{RpcClient, RpcGateway};
pub use store::{BlockStore, MemoryStore, RocksStateStore, SubscriberStore, TransactionStore};
