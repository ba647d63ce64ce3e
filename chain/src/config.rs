//! Top-level configuration for a ledger node.
//!
//! Aggregates every tunable the node needs into one `NodeConfig` — a
//! single struct a binary constructs from defaults and passes down. No
//! file or environment-variable loading is implemented, only the struct
//! and its defaults.

use std::net::SocketAddr;
use std::time::Duration;

use crate::store::RocksDbConfig;
use crate::types::{Account, Hash};

/// Parameters the ledger processor needs beyond the block itself: the
/// designated signer and link sentinel for each epoch transition, and the
/// work-difficulty floor (proof-of-work *algorithm* selection is a
/// Non-goal; this is only the numeric threshold the ledger compares
/// against).
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub epoch_v1_signer: Account,
    pub epoch_v1_link: Hash,
    pub epoch_v2_signer: Account,
    pub epoch_v2_link: Hash,
    pub work_threshold: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            epoch_v1_signer: Account(Hash::ZERO),
            epoch_v1_link: Hash::digest(b"epoch_v1_link"),
            epoch_v2_signer: Account(Hash::ZERO),
            epoch_v2_link: Hash::digest(b"epoch_v2_link"),
            work_threshold: 0xffff_ffc0_0000_0000,
        }
    }
}

/// Tuning for the active-transactions election engine.
#[derive(Clone, Debug)]
pub struct ActiveConfig {
    /// Fraction of online voting weight required to confirm an election.
    pub quorum_fraction: f64,
    pub online_weight_minimum: u128,
    pub election_ttl: Duration,
    pub max_active_elections: usize,
    pub recently_confirmed_capacity: usize,
    pub recently_cemented_capacity: usize,
    /// Matches the reference node's `dropped_elections` ring capacity
    /// (16 Ki entries).
    pub recently_dropped_capacity: usize,
    pub request_loop_interval: Duration,
    /// Epsilon subtracted from a dependent election's adjusted multiplier
    /// per ancestor so ancestors strictly outrank descendants.
    pub adjusted_multiplier_epsilon: f64,
    pub principal_representative_min_weight_fraction: f64,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        ActiveConfig {
            quorum_fraction: 0.67,
            online_weight_minimum: 0,
            election_ttl: Duration::from_secs(5 * 60),
            max_active_elections: 50_000,
            recently_confirmed_capacity: 65_536,
            recently_cemented_capacity: 65_536,
            recently_dropped_capacity: 16 * 1024,
            request_loop_interval: Duration::from_millis(500),
            adjusted_multiplier_epsilon: 1e-6,
            principal_representative_min_weight_fraction: 0.001,
        }
    }
}

/// Tuning for the vote generator worker.
#[derive(Clone, Debug)]
pub struct VoteGeneratorConfig {
    pub max_hashes_per_vote: usize,
    pub vote_generator_delay: Duration,
    pub flood_fanout: usize,
}

impl Default for VoteGeneratorConfig {
    fn default() -> Self {
        VoteGeneratorConfig {
            max_hashes_per_vote: 12,
            vote_generator_delay: Duration::from_millis(250),
            flood_fanout: 2,
        }
    }
}

/// Tuning for the per-endpoint request aggregator.
#[derive(Clone, Debug)]
pub struct RequestAggregatorConfig {
    pub max_queued_requests_per_endpoint: usize,
    pub max_request_age: Duration,
}

impl Default for RequestAggregatorConfig {
    fn default() -> Self {
        RequestAggregatorConfig {
            max_queued_requests_per_endpoint: 4_096,
            max_request_age: Duration::from_secs(15),
        }
    }
}

/// Tuning for the block processor pipeline.
#[derive(Clone, Debug)]
pub struct BlockProcessorConfig {
    pub max_batch_size: usize,
    pub batch_deadline: Duration,
    pub full_queue_size: usize,
    pub half_full_queue_size: usize,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        BlockProcessorConfig {
            max_batch_size: 256,
            batch_deadline: Duration::from_millis(200),
            full_queue_size: 65_536,
            half_full_queue_size: 32_768,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StorageConfig {
    pub rocksdb: RocksDbConfig,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let addr: SocketAddr = "127.0.0.1:9898"
            .parse()
            .expect("hard-coded metrics listen address should parse");
        MetricsConfig { enabled: true, listen_addr: addr }
    }
}

/// Top-level configuration for a ledger node: every sub-config a binary
/// wires together to run the full pipeline.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    pub ledger: LedgerConfig,
    pub active: ActiveConfig,
    pub vote_generator: VoteGeneratorConfig,
    pub request_aggregator: RequestAggregatorConfig,
    pub block_processor: BlockProcessorConfig,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_quorum_fraction() {
        let config = NodeConfig::default();
        assert!(config.active.quorum_fraction > 0.5 && config.active.quorum_fraction <= 1.0);
        assert_eq!(config.vote_generator.max_hashes_per_vote, 12);
    }
}
