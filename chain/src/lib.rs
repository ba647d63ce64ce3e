//! A delegated-proof-of-stake block-lattice ledger core.
//!
//! Every account owns an independent chain of blocks; send/receive pairs
//! move balance between accounts asynchronously, and root-level forks are
//! resolved by representative voting rather than a single global chain.
//!
//! Module map:
//!
//! - [`types`] — hashes, accounts, roots, amounts, epochs.
//! - [`block`] — the five block kinds and their canonical wire encoding.
//! - [`message`] — peer-to-peer message framing on top of [`block`] and
//!   [`vote`].
//! - [`vote`] — a representative's signed assertion about a root's winner.
//! - [`store`] — the [`store::LedgerStore`] abstraction plus in-memory and
//!   RocksDB-backed implementations.
//! - [`ledger`] — [`ledger::Ledger::process`]: the block validation and
//!   commit pipeline.
//! - [`block_processor`] — the queued/batched front door blocks enter
//!   through before reaching the ledger.
//! - [`uniquer`] — de-duplicates shared references by hash.
//! - [`vote_cache`] — recent and pre-election vote caches.
//! - [`active`] — the root-election engine: tallying votes and confirming
//!   winners.
//! - [`vote_generator`] — produces this node's own votes for blocks it is
//!   eligible to vote on.
//! - [`request_aggregator`] — serves `confirm_req`-style vote requests from
//!   cache or routes them to the vote generator.
//! - [`config`] — [`config::NodeConfig`], the aggregate of every
//!   sub-component's tuning.
//! - [`error`] — shared error and result-classification types.
//! - [`metrics`] — Prometheus metrics and HTTP exporter.

pub mod active;
pub mod block;
pub mod block_processor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod message;
pub mod metrics;
pub mod request_aggregator;
pub mod store;
pub mod types;
pub mod uniquer;
pub mod vote;
pub mod vote_cache;
pub mod vote_generator;

pub use active::{ActiveTransactions, Election, ElectionState};
pub use block::{Block, BlockDetails, BlockType, Sideband};
pub use block_processor::{AddOrigin, BlockProcessor, ElectionSink};
pub use config::NodeConfig;
pub use error::{CodecError, LedgerError, MessageError, ProcessCode, StorageError};
pub use ledger::Ledger;
pub use message::{Header, Message, MessageType};
pub use metrics::{LedgerMetrics, MetricsRegistry, run_prometheus_http_server};
pub use request_aggregator::{Channel, RequestAggregator, RequestOutcome};
pub use store::{LedgerStore, MemoryLedgerStore, RocksDbConfig, RocksDbLedgerStore};
pub use types::{Account, Amount, BlockHash, Epoch, Hash, QualifiedRoot, Root, Signature};
pub use uniquer::Uniquer;
pub use vote::{Vote, VotePayload};
pub use vote_cache::{InactiveVoteCache, RecentVoteCache};
pub use vote_generator::{LocalRepresentative, VoteGenerator, VoteSink};

/// Default ledger store backend for a production node.
pub type DefaultLedgerStore = RocksDbLedgerStore;
