//! Shared application state.

use std::sync::Arc;

use chain::active::ActiveTransactions;
use chain::block_processor::BlockProcessor;
use chain::ledger::Ledger;
use chain::metrics::MetricsRegistry;
use chain::request_aggregator::RequestAggregator;
use chain::store::RocksDbLedgerStore;
use chain::vote_generator::VoteGenerator;

/// Shared state held by the API and background tasks.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor.
pub struct AppState {
    pub ledger: Arc<Ledger<RocksDbLedgerStore>>,
    pub block_processor: Arc<BlockProcessor<RocksDbLedgerStore>>,
    pub active: Arc<ActiveTransactions<RocksDbLedgerStore>>,
    pub vote_generator: Arc<VoteGenerator<RocksDbLedgerStore>>,
    pub request_aggregator: Arc<RequestAggregator<RocksDbLedgerStore>>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
