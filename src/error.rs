//! Errors returned by the discovery engine

use alloy_primitives::Address;
use thiserror::Error;

/// Failure of a subscribe or discovery call.
///
/// A call either succeeds with a complete result or fails with one of
/// these; the engine never returns a partial transaction list.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The node could not report its current block while subscribing.
    #[error("error getting current block number cause: {0:#}")]
    CurrentBlock(#[source] anyhow::Error),

    /// Any other failure talking to the node.
    #[error("{0:#}")]
    Gateway(#[source] anyhow::Error),

    #[error("address {0:?} is not subscribed")]
    NotSubscribed(Address),

    #[error("{0:#}")]
    Persistence(#[source] anyhow::Error),

    /// The node reported fewer transactions than at subscription time.
    #[error("transaction count went backwards: subscribed at {subscribed}, node reports {current}")]
    CountRegressed { subscribed: u64, current: u64 },

    /// A block task panicked or was aborted.
    #[error("block task failed: {0}")]
    Task(String),

    /// Every failed block task of one concurrent scan.
    #[error("{}", format_aggregated(.0))]
    Aggregated(Vec<DiscoveryError>),
}

fn format_aggregated(errors: &[DiscoveryError]) -> String {
    errors
        .iter()
        .map(|e| format!("Error: {}\n", e))
        .collect()
}

impl DiscoveryError {
    pub fn is_not_subscribed(&self) -> bool {
        matches!(self, DiscoveryError::NotSubscribed(_))
    }
}
