//! Nouns pool - seed pool sync engine
//!
//! Main entry point: runs the refresh loop against the configured indexer and
//! auction house, logging a summary every refresh interval.

use std::env;
use std::sync::Arc;

use alloy_primitives::utils::format_ether;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nouns_auction::RpcAuctionReader;
use nouns_core::{ServiceConfig, Wei};
use nouns_pool_feed::{GraphqlIndexer, PollingFeed};
use nouns_pool_service::{JsonFileBookmarks, PoolService};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Decimal ether without trailing zeros
fn ether(wei: Wei) -> String {
    let formatted = format_ether(wei);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_logging();

    info!("Starting Nouns Pool v{}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::from_env()?;
    info!(
        chain = %config.upstream.chain,
        indexer = %config.upstream.indexer_url,
        auction_house = %config.upstream.auction_house,
        capacity = config.pool.capacity,
        interval_ms = config.refresh.interval_ms,
        "Configuration loaded"
    );

    let indexer = GraphqlIndexer::new(config.upstream.indexer_url.clone(), config.refresh.feed_timeout())?;
    let feed = PollingFeed::new(indexer, config.pool.capacity);

    let reader = RpcAuctionReader::new(
        config.upstream.rpc_url.clone(),
        config.upstream.auction_house,
        config.auction.price_decay_duration_secs,
        config.auction.decay_law,
        config.refresh.feed_timeout(),
    )?;

    let expected_chain_id = config.upstream.chain.chain_id();
    match reader.chain_id().await {
        Ok(id) if id == expected_chain_id => info!(chain_id = id, "RPC endpoint chain verified"),
        Ok(id) => warn!(expected = expected_chain_id, actual = id, "RPC endpoint is on a different chain"),
        Err(e) => warn!(error = %e, "Could not verify RPC chain id"),
    }

    let bookmarks_path = env::var("BOOKMARKS_PATH").unwrap_or_else(|_| "nouns-pool-bookmarks.json".to_string());
    let bookmarks = JsonFileBookmarks::open(bookmarks_path);

    let interval = config.refresh.interval();
    let service = PoolService::new(config, Arc::new(feed), Arc::new(reader), Arc::new(bookmarks));
    service.start();

    info!("Press Ctrl+C to shutdown");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let view = service.snapshot();
                info!(
                    status = %view.connection_status,
                    pool = view.pool_size,
                    visible = view.view.len(),
                    price = %view.current_price.map(ether).unwrap_or_else(|| "-".to_string()),
                    next_drop_secs = view.time_to_next_drop.unwrap_or(0),
                    next_noun_id = view.next_noun_id.unwrap_or(0),
                    paused = view.paused.unwrap_or(false),
                    "Pool snapshot"
                );
                if let Some(e) = &view.price_error {
                    warn!(error = %e, "Price unavailable");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    service.stop().await;

    let stats = service.stats();
    info!(
        refreshes_ok = stats.refreshes_ok,
        refreshes_failed = stats.refreshes_failed,
        coalesced = stats.refreshes_coalesced,
        malformed_dropped = stats.pool.malformed_dropped,
        "Shutdown complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn test_ether_trims_trailing_zeros() {
        assert_eq!(ether(U256::from(1_500_000_000_000_000_000u128)), "1.5");
        assert_eq!(ether(U256::from(2_000_000_000_000_000_000u128)), "2");
        assert_eq!(ether(U256::from(15_000_000_000_000_000u128)), "0.015");
        assert_eq!(ether(U256::ZERO), "0");
    }
}
