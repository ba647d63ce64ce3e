// src/main.rs
//
// Minimal demo node that wires up the chain library:
//
// - RocksDB-backed ledger store
// - Block processor feeding the ledger in batches
// - Active engine confirming elections from processed blocks
// - Vote generator producing this node's own votes
// - Request aggregator serving confirm_req-style lookups
// - Prometheus metrics exporter on /metrics

use std::sync::Arc;

use chain::active::ActiveTransactions;
use chain::block_processor::BlockProcessor;
use chain::config::NodeConfig;
use chain::ledger::Ledger;
use chain::metrics::{MetricsRegistry, run_prometheus_http_server};
use chain::request_aggregator::RequestAggregator;
use chain::store::RocksDbLedgerStore;
use chain::vote_cache::RecentVoteCache;
use chain::vote_generator::VoteGenerator;

#[tokio::main]
async fn main() {
    if let Err(err) = run_node().await {
        eprintln!("fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run_node() -> Result<(), String> {
    let cfg = NodeConfig::default();

    // ---------------------------
    // Metrics registry + exporter
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                eprintln!("metrics HTTP server error: {e}");
            }
        });
        eprintln!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Ledger store (RocksDB)
    // ---------------------------

    let store = RocksDbLedgerStore::open(&cfg.storage.rocksdb).map_err(|e| {
        format!(
            "failed to open RocksDB store at {}: {e:?}",
            cfg.storage.rocksdb.path
        )
    })?;

    let ledger = Arc::new(Ledger::new(Arc::new(store), cfg.ledger.clone()));

    // ---------------------------
    // Block processor + active engine
    // ---------------------------

    let block_processor = Arc::new(BlockProcessor::new(ledger.clone(), cfg.block_processor.clone()));
    let active = Arc::new(ActiveTransactions::new(ledger.clone(), cfg.active.clone()));
    block_processor.set_election_sink(active.clone());
    block_processor.set_metrics(Arc::new(metrics.ledger.clone()));

    {
        let block_processor = block_processor.clone();
        std::thread::Builder::new()
            .name("block-processor".into())
            .spawn(move || block_processor.run())
            .map_err(|e| format!("failed to spawn block processor thread: {e}"))?;
    }

    // ---------------------------
    // Vote generator + request aggregator
    //
    // No local representatives are configured for this demo node; it
    // participates in the network as a listener/relay only.
    // ---------------------------

    let vote_generator = Arc::new(VoteGenerator::new(ledger.clone(), cfg.vote_generator.clone(), Vec::new()));
    vote_generator.set_metrics(Arc::new(metrics.ledger.clone()));
    {
        let vote_generator = vote_generator.clone();
        std::thread::Builder::new()
            .name("vote-generator".into())
            .spawn(move || vote_generator.run())
            .map_err(|e| format!("failed to spawn vote generator thread: {e}"))?;
    }

    let recent_votes = Arc::new(RecentVoteCache::new(65_536, 1));
    let _request_aggregator = RequestAggregator::new(
        ledger.clone(),
        recent_votes,
        vote_generator,
        cfg.request_aggregator.clone(),
    );
    _request_aggregator.set_metrics(Arc::new(metrics.ledger.clone()));

    eprintln!("ledger node started (no peer transport wired in this demo)");

    // ---------------------------
    // Periodic election maintenance
    // ---------------------------

    loop {
        let active_roots = active.tick();
        metrics.ledger.elections_active.set(active_roots.len() as i64);
        tokio::time::sleep(cfg.active.request_loop_interval).await;
    }
}
