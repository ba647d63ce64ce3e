//! Request aggregator (C8): serves `confirm_req`-style vote requests
//! out of the recent-vote cache where possible, otherwise hands the
//! hash to the vote generator or records why it couldn't be served.
//!
//! Grounded directly on
//! `original_source/oslo/core_test/request_aggregator.cpp` for the
//! cache-hit/generate/unknown/cannot_vote branching and the 12-hash
//! outbound chunking.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::RequestAggregatorConfig;
use crate::ledger::Ledger;
use crate::message::MAX_VOTE_HASHES;
use crate::metrics::LedgerMetrics;
use crate::store::LedgerStore;
use crate::types::{BlockHash, Root};
use crate::vote::Vote;
use crate::vote_cache::RecentVoteCache;
use crate::vote_generator::VoteGenerator;

/// The outbound side of a peer connection. Kept as a strong reference
/// for as long as that endpoint has requests queued.
pub trait Channel: Send + Sync {
    fn send_votes(&self, votes: Vec<Vote>);
}

#[derive(Debug, Eq, PartialEq)]
pub enum RequestOutcome {
    CachedVotes,
    QueuedToGenerator,
    Unknown,
    CannotVote,
}

struct Request {
    hash: BlockHash,
    root: Root,
    queued_at: Instant,
}

struct EndpointQueue {
    channel: Arc<dyn Channel>,
    requests: VecDeque<Request>,
}

#[derive(Default)]
pub struct AggregatorMetrics {
    pub requests_cached_votes: AtomicU64,
    pub requests_generated: AtomicU64,
    pub requests_unknown: AtomicU64,
    pub requests_cannot_vote: AtomicU64,
    pub requests_dropped: AtomicU64,
}

pub struct RequestAggregator<S: LedgerStore> {
    ledger: Arc<Ledger<S>>,
    vote_cache: Arc<RecentVoteCache>,
    vote_generator: Arc<VoteGenerator<S>>,
    config: RequestAggregatorConfig,
    endpoints: Mutex<HashMap<String, EndpointQueue>>,
    pub metrics: AggregatorMetrics,
    prometheus_metrics: Mutex<Option<Arc<LedgerMetrics>>>,
}

impl<S: LedgerStore> RequestAggregator<S> {
    pub fn new(
        ledger: Arc<Ledger<S>>,
        vote_cache: Arc<RecentVoteCache>,
        vote_generator: Arc<VoteGenerator<S>>,
        config: RequestAggregatorConfig,
    ) -> Self {
        RequestAggregator {
            ledger,
            vote_cache,
            vote_generator,
            config,
            endpoints: Mutex::new(HashMap::new()),
            metrics: AggregatorMetrics::default(),
            prometheus_metrics: Mutex::new(None),
        }
    }

    pub fn set_metrics(&self, metrics: Arc<LedgerMetrics>) {
        *self.prometheus_metrics.lock() = Some(metrics);
    }

    /// Queues `(hash, root)` for `endpoint`, replacing the channel
    /// reference held for it. Rejects the admission once the endpoint's
    /// queue is at capacity.
    pub fn request(&self, endpoint: &str, channel: Arc<dyn Channel>, hash: BlockHash, root: Root) -> bool {
        let mut endpoints = self.endpoints.lock();
        let queue = endpoints.entry(endpoint.to_string()).or_insert_with(|| EndpointQueue {
            channel: channel.clone(),
            requests: VecDeque::new(),
        });
        queue.channel = channel;
        if queue.requests.len() >= self.config.max_queued_requests_per_endpoint {
            self.metrics.requests_dropped.fetch_add(1, Ordering::Relaxed);
            self.record_outcome("dropped");
            return false;
        }
        queue.requests.push_back(Request { hash, root, queued_at: Instant::now() });
        true
    }

    /// Drains and serves every request queued for `endpoint`, sending
    /// any cached votes found in chunks of [`MAX_VOTE_HASHES`].
    pub fn process_endpoint(&self, endpoint: &str) -> Vec<RequestOutcome> {
        let (channel, requests) = {
            let mut endpoints = self.endpoints.lock();
            let Some(queue) = endpoints.get_mut(endpoint) else { return Vec::new() };
            let max_age = self.config.max_request_age;
            queue.requests.retain(|r| r.queued_at.elapsed() <= max_age);
            let requests: Vec<Request> = queue.requests.drain(..).collect();
            (queue.channel.clone(), requests)
        };

        let mut outcomes = Vec::with_capacity(requests.len());
        let mut outbound: Vec<Vote> = Vec::new();
        for request in requests {
            let outcome = self.serve_one(request.hash, &mut outbound);
            outcomes.push(outcome);
        }

        for chunk in outbound.chunks(MAX_VOTE_HASHES) {
            channel.send_votes(chunk.to_vec());
        }
        outcomes
    }

    fn serve_one(&self, hash: BlockHash, outbound: &mut Vec<Vote>) -> RequestOutcome {
        let cached = self.vote_cache.votes_for(&hash);
        if !cached.is_empty() {
            self.metrics.requests_cached_votes.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = self.prometheus_metrics.lock().clone() {
                metrics.votes_cache_hits.inc();
            }
            self.record_outcome("cached_votes");
            outbound.extend(cached);
            return RequestOutcome::CachedVotes;
        }

        match self.ledger.store().block(&hash) {
            None => {
                self.metrics.requests_unknown.fetch_add(1, Ordering::Relaxed);
                self.record_outcome("unknown");
                RequestOutcome::Unknown
            }
            Some(_) if self.can_vote(&hash) => {
                self.vote_generator.add(hash);
                self.metrics.requests_generated.fetch_add(1, Ordering::Relaxed);
                self.record_outcome("queued_to_generator");
                RequestOutcome::QueuedToGenerator
            }
            Some(_) => {
                self.metrics.requests_cannot_vote.fetch_add(1, Ordering::Relaxed);
                self.record_outcome("cannot_vote");
                RequestOutcome::CannotVote
            }
        }
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(metrics) = self.prometheus_metrics.lock().clone() {
            metrics.aggregator_requests.with_label_values(&[outcome]).inc();
        }
    }

    /// A block `can_vote` once every block it depends on has already
    /// been confirmed, approximated here as: its sideband height sits at
    /// or below one past its account's confirmation height.
    fn can_vote(&self, hash: &BlockHash) -> bool {
        let Some((_, sideband)) = self.ledger.store().block(hash) else { return false };
        if sideband.height <= 1 {
            return true;
        }
        let confirmed_height = self
            .ledger
            .store()
            .confirmation_height(&sideband.account)
            .map(|c| c.height)
            .unwrap_or(0);
        sideband.height <= confirmed_height + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, VoteGeneratorConfig};
    use crate::store::MemoryLedgerStore;
    use crate::types::{Account, Hash, Signature};
    use crate::vote::VotePayload;
    use std::sync::Mutex as StdMutex;

    struct RecordingChannel {
        sent: StdMutex<Vec<Vote>>,
    }

    impl Channel for RecordingChannel {
        fn send_votes(&self, votes: Vec<Vote>) {
            self.sent.lock().unwrap().extend(votes);
        }
    }

    fn aggregator() -> (RequestAggregator<MemoryLedgerStore>, Arc<RecentVoteCache>) {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default()));
        let vote_cache = Arc::new(RecentVoteCache::new(1024, 1));
        let vote_generator = Arc::new(VoteGenerator::new(ledger.clone(), VoteGeneratorConfig::default(), Vec::new()));
        let aggregator = RequestAggregator::new(ledger, vote_cache.clone(), vote_generator, RequestAggregatorConfig::default());
        (aggregator, vote_cache)
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let (aggregator, vote_cache) = aggregator();
        let h1 = BlockHash(Hash::digest(b"h1"));
        let rep = Account(Hash::digest(b"rep"));
        vote_cache.insert(Vote {
            account: rep,
            signature: Signature::default(),
            sequence: 1,
            payload: VotePayload::hashes(vec![h1]).unwrap(),
        });

        let channel = Arc::new(RecordingChannel { sent: StdMutex::new(Vec::new()) });
        let root = Root(Hash::digest(b"root"));
        assert!(aggregator.request("peer-1", channel.clone(), h1, root));
        let outcomes = aggregator.process_endpoint("peer-1");
        assert_eq!(outcomes, vec![RequestOutcome::CachedVotes]);
        assert_eq!(aggregator.metrics.requests_cached_votes.load(Ordering::Relaxed), 1);
        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_block_is_recorded() {
        let (aggregator, _vote_cache) = aggregator();
        let channel = Arc::new(RecordingChannel { sent: StdMutex::new(Vec::new()) });
        let h1 = BlockHash(Hash::digest(b"missing"));
        let root = Root(Hash::digest(b"root"));
        aggregator.request("peer-1", channel, h1, root);
        let outcomes = aggregator.process_endpoint("peer-1");
        assert_eq!(outcomes, vec![RequestOutcome::Unknown]);
    }

    #[test]
    fn queue_over_capacity_is_dropped() {
        let (aggregator, _vote_cache) = aggregator();
        let channel = Arc::new(RecordingChannel { sent: StdMutex::new(Vec::new()) });
        let root = Root(Hash::digest(b"root"));
        let mut config = RequestAggregatorConfig::default();
        config.max_queued_requests_per_endpoint = 1;
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default()));
        let vote_cache = Arc::new(RecentVoteCache::new(1024, 1));
        let vote_generator = Arc::new(VoteGenerator::new(ledger.clone(), VoteGeneratorConfig::default(), Vec::new()));
        let aggregator = RequestAggregator::new(ledger, vote_cache, vote_generator, config);
        let h1 = BlockHash(Hash::digest(b"h1"));
        let h2 = BlockHash(Hash::digest(b"h2"));
        assert!(aggregator.request("peer-1", channel.clone(), h1, root));
        assert!(!aggregator.request("peer-1", channel, h2, root));
        assert_eq!(aggregator.metrics.requests_dropped.load(Ordering::Relaxed), 1);
    }
}
