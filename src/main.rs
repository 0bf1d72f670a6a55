// ABOUTME: Main entry point for pool-relay
//
// Binary: pool-relay
// Usage: pool-relay [--target host:port] [--listen addr:port] [--config FILE]
// - Resolves the target and dials every IP (fatal if resolution fails)
// - Relays each accepted client over a randomly chosen pool member
// - Ctrl-C stops accepting and drains the pool

#![allow(missing_docs)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use pool_relay::cli::Cli;
use pool_relay::config::RelayConfig;
use pool_relay::logging;
use pool_relay::relay::{ConnectionPool, DnsResolver, Forwarder, Listener, RelayMetrics, TcpDialer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init(args.log_format)?;

    let mut config = RelayConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    let target = config.validate()?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let metrics = Arc::new(RelayMetrics::new());
    let pool = Arc::new(
        ConnectionPool::new(
            target,
            Arc::new(DnsResolver),
            Arc::new(TcpDialer::from_config(&config)),
            config.max_concurrent_redials,
        )
        .with_metrics(Arc::clone(&metrics)),
    );

    // No target, nothing to relay
    let size = pool
        .initialize()
        .await
        .with_context(|| format!("Failed to initialize pool for {}", config.target))?;
    if size == 0 {
        warn!(upstream = %config.target, "Starting with an empty pool; clients are refused until a member connects");
    }

    let forwarder = Forwarder::new(Arc::clone(&pool), config.buffer_size);
    let mut listener = Listener::new(Arc::clone(&pool), forwarder, config.accept_backoff);
    listener
        .start(&config.listen)
        .await
        .context("Failed to start listener")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    listener.stop().await?;
    pool.drain().await;

    let stats = metrics.snapshot();
    info!(
        clients_accepted = stats.clients_accepted,
        clients_rejected = stats.clients_rejected,
        failures_reported = stats.failures_reported,
        members_released = stats.members_released,
        redials_succeeded = stats.redials_succeeded,
        redials_failed = stats.redials_failed,
        reinitializations = stats.reinitializations,
        bytes_to_target = stats.bytes_to_target,
        bytes_to_client = stats.bytes_to_client,
        "Relay stopped"
    );

    Ok(())
}
