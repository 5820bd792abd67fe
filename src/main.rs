//! txwatch - Ethereum address transaction discovery CLI
//!
//! Subscribes addresses and lists the transactions they sent or received
//! since subscription.

use tracing_subscriber::EnvFilter;
use txwatch::cli;
use txwatch::config::DEFAULT_LOG_FILTER;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
