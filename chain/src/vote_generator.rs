//! Vote generator (C7): accumulates hashes the local node is eligible to
//! vote on and, for every locally-held voting representative, produces a
//! signed [`Vote`] once the batch fills or an age deadline passes.
//!
//! The network hand-off is abstracted behind a [`VoteSink`] trait so the
//! generator's own logic stays free of transport concerns.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::{Condvar, Mutex};

use crate::config::VoteGeneratorConfig;
use crate::ledger::Ledger;
use crate::metrics::LedgerMetrics;
use crate::store::LedgerStore;
use crate::types::{Account, BlockHash, Signature};
use crate::vote::{Vote, VotePayload};

/// A locally-held voting representative: its account and the Ed25519
/// key that signs on its behalf.
pub struct LocalRepresentative {
    pub account: Account,
    pub signing_key: SigningKey,
}

/// Receives freshly-generated votes to flood to the network. Principal
/// representatives are handed the vote first; `fanout` names how many
/// of the general population to additionally flood to.
pub trait VoteSink: Send + Sync {
    fn flood(&self, vote: Vote, fanout: usize);
}

struct PendingEntry {
    hash: BlockHash,
    queued_at: Instant,
}

struct State {
    pending: VecDeque<PendingEntry>,
    stopped: bool,
}

pub struct VoteGenerator<S: LedgerStore> {
    ledger: Arc<Ledger<S>>,
    config: VoteGeneratorConfig,
    representatives: Vec<LocalRepresentative>,
    state: Mutex<State>,
    condvar: Condvar,
    /// Last sequence issued per local representative; strictly
    /// increasing across the node's lifetime.
    sequences: Mutex<HashMap<Account, u64>>,
    sink: Mutex<Option<Arc<dyn VoteSink>>>,
    metrics: Mutex<Option<Arc<LedgerMetrics>>>,
}

impl<S: LedgerStore> VoteGenerator<S> {
    pub fn new(ledger: Arc<Ledger<S>>, config: VoteGeneratorConfig, representatives: Vec<LocalRepresentative>) -> Self {
        VoteGenerator {
            ledger,
            config,
            representatives,
            state: Mutex::new(State { pending: VecDeque::new(), stopped: false }),
            condvar: Condvar::new(),
            sequences: Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
            metrics: Mutex::new(None),
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn VoteSink>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn set_metrics(&self, metrics: Arc<LedgerMetrics>) {
        *self.metrics.lock() = Some(metrics);
    }

    /// Enqueues `hash`. The caller is responsible for having already
    /// established that the block is `can_vote` (every dependency
    /// confirmed) — this generator does not re-derive that itself.
    pub fn add(&self, hash: BlockHash) {
        let mut state = self.state.lock();
        if state.pending.iter().any(|e| e.hash == hash) {
            return;
        }
        state.pending.push_back(PendingEntry { hash, queued_at: Instant::now() });
        let ready = state.pending.len() >= self.config.max_hashes_per_vote;
        drop(state);
        if ready {
            self.condvar.notify_one();
        }
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.condvar.notify_all();
    }

    /// Runs the worker loop until [`Self::stop`]: wakes when the pending
    /// deque reaches capacity or the oldest entry has waited past
    /// `vote_generator_delay`, whichever comes first.
    pub fn run(&self) {
        loop {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            if state.pending.is_empty() {
                self.condvar.wait(&mut state);
                if state.stopped {
                    return;
                }
                continue;
            }
            let oldest_age = state.pending.front().map(|e| e.queued_at.elapsed());
            let ready = state.pending.len() >= self.config.max_hashes_per_vote
                || oldest_age.map(|age| age >= self.config.vote_generator_delay).unwrap_or(false);
            if !ready {
                let remaining = self.config.vote_generator_delay.saturating_sub(oldest_age.unwrap_or_default());
                self.condvar.wait_for(&mut state, remaining);
                continue;
            }
            drop(state);
            self.flush();
        }
    }

    /// Drains up to `max_hashes_per_vote` pending hashes and produces one
    /// vote per local representative covering them.
    pub fn flush(&self) -> Vec<Vote> {
        let hashes: Vec<BlockHash> = {
            let mut state = self.state.lock();
            let n = self.config.max_hashes_per_vote.min(state.pending.len());
            state.pending.drain(..n).map(|e| e.hash).collect()
        };
        if hashes.is_empty() {
            return Vec::new();
        }
        let metrics = self.metrics.lock().clone();
        let mut votes = Vec::with_capacity(self.representatives.len());
        for rep in &self.representatives {
            let vote = self.sign_vote(rep, &hashes);
            votes.push(vote.clone());
            if let Some(metrics) = &metrics {
                metrics.votes_generated.inc();
            }
            if let Some(sink) = self.sink.lock().clone() {
                let fanout = if self.is_principal_representative(rep.account) { 0 } else { self.config.flood_fanout };
                sink.flood(vote, fanout);
            }
        }
        votes
    }

    fn sign_vote(&self, rep: &LocalRepresentative, hashes: &[BlockHash]) -> Vote {
        let mut sequences = self.sequences.lock();
        let sequence = sequences.entry(rep.account).or_insert(0);
        *sequence += 1;
        let sequence = *sequence;
        drop(sequences);

        let signing_bytes = Vote::signing_bytes(rep.account, sequence, hashes);
        let signature = Signature(rep.signing_key.sign(&signing_bytes).to_bytes());
        Vote {
            account: rep.account,
            signature,
            sequence,
            payload: VotePayload::Hashes(hashes.to_vec()),
        }
    }

    fn is_principal_representative(&self, account: Account) -> bool {
        let store = self.ledger.store();
        let weight = store.rep_weight(&account);
        let online = store.online_weight().max(1);
        weight as f64 / online as f64 >= self.principal_threshold()
    }

    fn principal_threshold(&self) -> f64 {
        // A vote generator does not carry its own copy of the active
        // engine's threshold; representatives with any measurable weight
        // are treated as "flood first" candidates when none is supplied.
        0.001
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::store::MemoryLedgerStore;
    use crate::types::Hash;
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: AtomicUsize,
    }

    impl VoteSink for CountingSink {
        fn flood(&self, _vote: Vote, _fanout: usize) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn generator() -> (Arc<VoteGenerator<MemoryLedgerStore>>, Account) {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default()));
        let signing_key = SigningKey::generate(&mut OsRng);
        let account = Account(Hash(signing_key.verifying_key().to_bytes()));
        let generator = VoteGenerator::new(
            ledger,
            VoteGeneratorConfig::default(),
            vec![LocalRepresentative { account, signing_key }],
        );
        (Arc::new(generator), account)
    }

    #[test]
    fn flush_produces_one_vote_per_local_representative() {
        let (generator, account) = generator();
        generator.add(BlockHash(Hash::digest(b"a")));
        generator.add(BlockHash(Hash::digest(b"b")));
        let votes = generator.flush();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].account, account);
        assert_eq!(votes[0].payload.block_hashes().len(), 2);
    }

    #[test]
    fn sequence_is_monotonic_across_flushes() {
        let (generator, _account) = generator();
        generator.add(BlockHash(Hash::digest(b"a")));
        let first = generator.flush();
        generator.add(BlockHash(Hash::digest(b"b")));
        let second = generator.flush();
        assert!(second[0].sequence > first[0].sequence);
    }

    #[test]
    fn flush_notifies_sink() {
        let (generator, _account) = generator();
        let sink = Arc::new(CountingSink { count: AtomicUsize::new(0) });
        generator.set_sink(sink.clone());
        generator.add(BlockHash(Hash::digest(b"a")));
        generator.flush();
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }
}
