//! Ethereum address poller binary
//!
//! Subscribes every address of a watchlist and periodically reports the
//! transactions they sent or received.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use txwatch::cli::EngineArgs;
use txwatch::config::DEFAULT_LOG_FILTER;
use txwatch::watcher::Watcher;

/// Ethereum address poller
#[derive(Parser)]
#[command(name = "txwatch-poller")]
#[command(about = "Poll watched addresses for new transactions")]
struct Args {
    #[command(flatten)]
    engine: EngineArgs,

    /// Path to watchlist file (one address per line)
    #[arg(short, long, default_value = "watchlist.txt")]
    watchlist: PathBuf,

    /// Seconds between polls
    #[arg(short, long, default_value_t = 12)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let args = Args::parse();

    info!("Starting txwatch poller");
    info!("RPC URL: {}", args.engine.rpc_url);
    info!("Strategy: {:?}", args.engine.strategy);
    info!("Watchlist: {:?}", args.watchlist);
    info!("Database: {:?}", args.engine.db_path);

    let discovery = args.engine.build()?;
    let mut watcher = Watcher::new(discovery, Duration::from_secs(args.interval_secs));

    watcher
        .initialize(&args.watchlist)
        .await
        .context("Failed to initialize watcher")?;

    // Handle Ctrl+C gracefully
    tokio::select! {
        result = watcher.run() => {
            result.context("Watcher error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    info!("Poller stopped");
    Ok(())
}
