// api-gateway/src/main.rs

//! API gateway binary.
//!
//! This binary exposes a small HTTP API on top of the `chain` crate:
//!
//! - `GET /health`
//! - `GET /metrics`
//! - `POST /blocks/publish`
//!
//! It embeds a RocksDB-backed ledger, the block processor, the active
//! elections engine, the vote generator, and the request aggregator,
//! wired together the way `chain::main` wires its own demo node.

mod config;
mod routes;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::signal;

use chain::active::ActiveTransactions;
use chain::block_processor::BlockProcessor;
use chain::config::NodeConfig;
use chain::ledger::Ledger;
use chain::metrics::MetricsRegistry;
use chain::request_aggregator::RequestAggregator;
use chain::store::RocksDbLedgerStore;
use chain::vote_cache::RecentVoteCache;
use chain::vote_generator::VoteGenerator;
use config::ApiConfig;
use routes::{blocks, health, metrics as metrics_route};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() {
    // Basic tracing setup.
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "api_gateway=info,chain=info".to_string()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    // For now we use default configs. These can be externalised later.
    let api_cfg = ApiConfig::default();
    let node_cfg = NodeConfig::default();

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    // ---------------------------
    // Ledger store (RocksDB)
    // ---------------------------

    let store = RocksDbLedgerStore::open(&node_cfg.storage.rocksdb).map_err(|e| {
        format!(
            "failed to open RocksDB store at {}: {e:?}",
            node_cfg.storage.rocksdb.path
        )
    })?;

    let ledger = Arc::new(Ledger::new(Arc::new(store), node_cfg.ledger.clone()));

    // ---------------------------
    // Block processor + active engine
    // ---------------------------

    let block_processor = Arc::new(BlockProcessor::new(ledger.clone(), node_cfg.block_processor.clone()));
    let active = Arc::new(ActiveTransactions::new(ledger.clone(), node_cfg.active.clone()));
    block_processor.set_election_sink(active.clone());
    block_processor.set_metrics(Arc::new(metrics.ledger.clone()));

    {
        let worker = block_processor.clone();
        std::thread::Builder::new()
            .name("block-processor".into())
            .spawn(move || worker.run())
            .map_err(|e| format!("failed to spawn block processor thread: {e}"))?;
    }

    // ---------------------------
    // Vote generator + request aggregator
    //
    // No local representatives are configured for this gateway node; it
    // serves reads and test-ingestion only.
    // ---------------------------

    let vote_generator = Arc::new(VoteGenerator::new(ledger.clone(), node_cfg.vote_generator.clone(), Vec::new()));
    vote_generator.set_metrics(Arc::new(metrics.ledger.clone()));
    {
        let worker = vote_generator.clone();
        std::thread::Builder::new()
            .name("vote-generator".into())
            .spawn(move || worker.run())
            .map_err(|e| format!("failed to spawn vote generator thread: {e}"))?;
    }

    let recent_votes = Arc::new(RecentVoteCache::new(65_536, 1));
    let request_aggregator = Arc::new(RequestAggregator::new(
        ledger.clone(),
        recent_votes,
        vote_generator.clone(),
        node_cfg.request_aggregator.clone(),
    ));
    request_aggregator.set_metrics(Arc::new(metrics.ledger.clone()));

    // ---------------------------
    // Election maintenance loop
    // ---------------------------

    {
        let active = active.clone();
        let metrics = metrics.clone();
        let interval = node_cfg.active.request_loop_interval;
        tokio::spawn(async move {
            loop {
                let active_roots = active.tick();
                metrics.ledger.elections_active.set(active_roots.len() as i64);
                tokio::time::sleep(interval).await;
            }
        });
    }

    // ---------------------------
    // Shared state
    // ---------------------------

    let app_state: SharedState = Arc::new(AppState {
        ledger,
        block_processor,
        active,
        vote_generator,
        request_aggregator,
        metrics: metrics.clone(),
    });

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics_route::metrics))
        .route("/blocks/publish", post(blocks::publish))
        .with_state(app_state);

    // ---------------------------
    // axum 0.8 server (hyper 1 / tokio 1.48 style)
    // ---------------------------

    tracing::info!("API gateway listening on http://{}", api_cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", api_cfg.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"))?;

    Ok(())
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
