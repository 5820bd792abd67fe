//! Configuration and watchlist loading
//!
//! Handles loading the watchlist from a file and the knobs of the
//! concurrent scan. Each watchlist line holds one Ethereum address in hex.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs;
use std::path::Path;

/// Log filter used by both binaries when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default cap on simultaneous block fetches for the concurrent strategy.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Which discovery strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Fetch blocks in parallel, keep nothing between calls
    Concurrent,
    /// Scan sequentially and remember discovered transactions
    Memoizing,
}

/// Settings for the concurrent strategy.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    max_in_flight: usize,
}

impl ScanConfig {
    /// A cap of 0 is raised to 1.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Maximum number of blocks fetched at once, at least 1.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

/// Load a watchlist from a file.
///
/// Each line should contain one Ethereum address in hex format (with or without 0x prefix).
/// Empty lines and lines starting with '#' are ignored.
///
/// # Example file format:
/// ```text
/// 0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb
/// 0xdAC17F958D2ee523a2206206994597C13D831ec7
/// # This is a comment
/// ```
pub fn load_watchlist(path: &Path) -> Result<Vec<Address>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read watchlist file: {:?}", path))?;

    let mut addresses = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let addr = parse_address(line)
            .with_context(|| format!("Invalid address on line {}: {}", line_num + 1, line))?;

        if !addresses.contains(&addr) {
            addresses.push(addr);
        }
    }

    if addresses.is_empty() {
        anyhow::bail!("Watchlist is empty (no valid addresses found)");
    }

    Ok(addresses)
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix, in any letter case.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!("Address must be 20 bytes (40 hex chars), got {} bytes", bytes.len());
    }

    Ok(Address::from_slice(&bytes))
}
