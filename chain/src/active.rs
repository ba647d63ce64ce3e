//! Active engine (C6): the set of ongoing elections, ordered by adjusted
//! multiplier, that decide which of possibly several competing blocks at
//! a root becomes confirmed.
//!
//! Grounded on `original_source/oslo/node/active_transactions.hpp` (the
//! `roots` multi-index, `recently_confirmed`/`recently_cemented`/
//! `recently_dropped` rings, `election_insertion_result`,
//! `multipliers_cb`), translated into two cooperating maps under one
//! `parking_lot::Mutex` rather than a single C++ multi-index container.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::block::Block;
use crate::block_processor::{AddOrigin, ElectionSink};
use crate::config::ActiveConfig;
use crate::ledger::{Ledger, ProcessResult};
use crate::store::{ConfirmationHeightInfo, LedgerStore, StoreOp, WriteBatch};
use crate::types::{Account, Amount, BlockHash, QualifiedRoot, Root};
use crate::vote::Vote;
use crate::vote_cache::{InactiveVoteCache, RecentVoteCache};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElectionState {
    New,
    Active,
    Confirmed,
    Expired,
    Stopped,
}

pub struct Election {
    pub qualified_root: QualifiedRoot,
    pub state: ElectionState,
    pub blocks: HashMap<BlockHash, Block>,
    /// Last sequence and chosen hash per voting representative.
    pub last_votes: HashMap<Account, (u64, BlockHash)>,
    /// Multiplier derived from work alone, before dependency capping.
    pub base_multiplier: f64,
    /// Priority multiplier actually used for ordering: `base_multiplier`,
    /// capped below any still-active ancestor's by
    /// [`ActiveConfig::adjusted_multiplier_epsilon`] per ancestor.
    pub adjusted_multiplier: f64,
    pub started: Instant,
    /// Ancestor block hashes this election's winner depends on that are
    /// not yet confirmed.
    pub dependencies: HashSet<BlockHash>,
    pub confirmed_hash: Option<BlockHash>,
}

impl Election {
    /// Recomputes each candidate's tally as the sum of voting weight of
    /// every representative whose latest vote names it.
    pub fn tally(&self, weight_of: &dyn Fn(Account) -> Amount) -> HashMap<BlockHash, Amount> {
        let mut totals: HashMap<BlockHash, Amount> = HashMap::new();
        for (account, (_, hash)) in &self.last_votes {
            *totals.entry(*hash).or_insert(0) += weight_of(*account);
        }
        totals
    }

    pub fn winner(&self, weight_of: &dyn Fn(Account) -> Amount) -> Option<(BlockHash, Amount)> {
        self.tally(weight_of).into_iter().max_by_key(|(_, weight)| *weight)
    }
}

pub struct ConfirmationResult {
    pub qualified_root: QualifiedRoot,
    pub winner: BlockHash,
    pub height: u64,
}

#[derive(Clone, Copy)]
pub struct ElectionInsertionResult {
    pub inserted: bool,
}

struct Indexes {
    roots: HashMap<QualifiedRoot, Arc<Mutex<Election>>>,
    by_multiplier: BTreeMap<(Reverse<u64>, QualifiedRoot), ()>,
    blocks: HashMap<BlockHash, QualifiedRoot>,
    recently_confirmed: VecDeque<(QualifiedRoot, BlockHash)>,
    recently_cemented: VecDeque<ConfirmationResult>,
    recently_dropped: VecDeque<(QualifiedRoot, Instant)>,
    /// Trailing window of the highest active adjusted multiplier sampled
    /// on each `tick`, mirroring `multipliers_cb`.
    multipliers_cb: VecDeque<f64>,
}

/// Number of trailing `tick` samples `trended_active_multiplier` averages
/// over, matching the window size used by `multipliers_cb` in
/// `original_source/oslo/node/active_transactions.hpp`.
const MULTIPLIERS_CB_CAPACITY: usize = 20;

pub struct ActiveTransactions<S: LedgerStore> {
    ledger: Arc<Ledger<S>>,
    config: ActiveConfig,
    indexes: Mutex<Indexes>,
    inactive_votes: InactiveVoteCache,
    recent_votes: RecentVoteCache,
}

fn multiplier_key(m: f64) -> Reverse<u64> {
    Reverse(m.max(0.0).to_bits())
}

/// Normalizes a block's work value against the configured floor into a
/// multiplier in `[1.0, ..)`: the reference difficulty maps to `1.0` and
/// harder work maps higher. Work-threshold selection is itself a
/// Non-goal; this only needs to be monotonic in `work`.
fn normalized_multiplier(work: u64, threshold: u64) -> f64 {
    if work <= threshold {
        1.0
    } else {
        1.0 + ((work - threshold) as f64 / threshold.max(1) as f64)
    }
}

impl<S: LedgerStore> ActiveTransactions<S> {
    pub fn new(ledger: Arc<Ledger<S>>, config: ActiveConfig) -> Self {
        let recent_votes = RecentVoteCache::new(65_536, 1);
        let inactive_votes = InactiveVoteCache::new(config.recently_confirmed_capacity);
        ActiveTransactions {
            ledger,
            config,
            indexes: Mutex::new(Indexes {
                roots: HashMap::new(),
                by_multiplier: BTreeMap::new(),
                blocks: HashMap::new(),
                recently_confirmed: VecDeque::new(),
                recently_cemented: VecDeque::new(),
                recently_dropped: VecDeque::new(),
                multipliers_cb: VecDeque::new(),
            }),
            inactive_votes,
            recent_votes,
        }
    }

    fn root_of(&self, block: &Block) -> QualifiedRoot {
        let previous = block.previous();
        let root = if previous.is_zero() {
            match block.account_field() {
                Some(account) => Root(account.0),
                None => Root(previous.0),
            }
        } else {
            Root(previous.0)
        };
        QualifiedRoot { previous, root }
    }

    /// Inserts `block`, creating a new election or adding it as a
    /// competing copy of an existing one. Re-insertion of a block into
    /// its own election, or into a root suppressed by
    /// `recently_confirmed`, is a no-op.
    pub fn insert(&self, block: Block, work_threshold: u64) -> ElectionInsertionResult {
        let qualified_root = self.root_of(&block);
        let hash = block.hash();
        let mut indexes = self.indexes.lock();

        if indexes.recently_confirmed.iter().any(|(r, _)| *r == qualified_root) {
            return ElectionInsertionResult { inserted: false };
        }

        if let Some(election) = indexes.roots.get(&qualified_root).cloned() {
            let (candidate_base, dependencies) = {
                let mut election = election.lock();
                if !election.blocks.contains_key(&hash) {
                    election.blocks.insert(hash, block.clone());
                }
                let candidate_base = normalized_multiplier(block.work(), work_threshold);
                (candidate_base, election.dependencies.clone())
            };
            if candidate_base > election.lock().base_multiplier {
                let new_adjusted = self.capped_multiplier(&indexes, &qualified_root, candidate_base, &dependencies);
                let old_key = {
                    let mut election = election.lock();
                    let old_key = multiplier_key(election.adjusted_multiplier);
                    election.base_multiplier = candidate_base;
                    election.adjusted_multiplier = new_adjusted;
                    old_key
                };
                indexes.by_multiplier.remove(&(old_key, qualified_root.clone()));
                indexes
                    .by_multiplier
                    .insert((multiplier_key(new_adjusted), qualified_root.clone()), ());
            }
            indexes.blocks.insert(hash, qualified_root);
            return ElectionInsertionResult { inserted: false };
        }

        if indexes.roots.len() >= self.config.max_active_elections {
            self.evict_lowest_priority(&mut indexes);
        }

        let base_multiplier = normalized_multiplier(block.work(), work_threshold);
        let dependencies = dependencies_of(&block);
        let adjusted_multiplier = self.capped_multiplier(&indexes, &qualified_root, base_multiplier, &dependencies);
        let mut blocks = HashMap::new();
        blocks.insert(hash, block.clone());

        let mut last_votes = HashMap::new();
        for vote in self.inactive_votes.take(&hash) {
            last_votes.insert(vote.account, (vote.sequence, hash));
        }

        let election = Election {
            qualified_root: qualified_root.clone(),
            state: ElectionState::Active,
            blocks,
            last_votes,
            base_multiplier,
            adjusted_multiplier,
            started: Instant::now(),
            dependencies,
            confirmed_hash: None,
        };

        indexes.roots.insert(qualified_root.clone(), Arc::new(Mutex::new(election)));
        indexes
            .by_multiplier
            .insert((multiplier_key(adjusted_multiplier), qualified_root.clone()), ());
        indexes.blocks.insert(hash, qualified_root);
        ElectionInsertionResult { inserted: true }
    }

    /// Caps `base` below any still-active ancestor election's current
    /// `adjusted_multiplier` by [`ActiveConfig::adjusted_multiplier_epsilon`]
    /// per ancestor, so ancestors always strictly outrank their dependents
    /// in `by_multiplier`.
    fn capped_multiplier(
        &self,
        indexes: &Indexes,
        qualified_root: &QualifiedRoot,
        base: f64,
        dependencies: &HashSet<BlockHash>,
    ) -> f64 {
        let mut multiplier = base;
        for dep_hash in dependencies {
            let Some(dep_root) = indexes.blocks.get(dep_hash) else { continue };
            if dep_root == qualified_root {
                continue;
            }
            let Some(dep_election) = indexes.roots.get(dep_root) else { continue };
            let dep_adjusted = dep_election.lock().adjusted_multiplier;
            let capped = dep_adjusted - self.config.adjusted_multiplier_epsilon;
            if capped < multiplier {
                multiplier = capped;
            }
        }
        multiplier.max(0.0)
    }

    /// Recomputes one election's `adjusted_multiplier` against the current
    /// state of its dependencies and updates `by_multiplier` in place.
    fn recompute_adjusted_multiplier(&self, indexes: &mut Indexes, qualified_root: &QualifiedRoot) {
        let Some(election) = indexes.roots.get(qualified_root).cloned() else { return };
        let (base, dependencies, old_multiplier) = {
            let election = election.lock();
            (election.base_multiplier, election.dependencies.clone(), election.adjusted_multiplier)
        };
        let new_multiplier = self.capped_multiplier(indexes, qualified_root, base, &dependencies);
        if (new_multiplier - old_multiplier).abs() < f64::EPSILON {
            return;
        }
        election.lock().adjusted_multiplier = new_multiplier;
        indexes.by_multiplier.remove(&(multiplier_key(old_multiplier), qualified_root.clone()));
        indexes
            .by_multiplier
            .insert((multiplier_key(new_multiplier), qualified_root.clone()), ());
    }

    /// Recomputes every still-active election whose dependencies named
    /// `confirmed_hash`, letting them rise now that ancestor is resolved.
    fn recompute_dependents(&self, indexes: &mut Indexes, confirmed_hash: BlockHash) {
        let dependents: Vec<QualifiedRoot> = indexes
            .roots
            .iter()
            .filter(|(_, election)| election.lock().dependencies.contains(&confirmed_hash))
            .map(|(root, _)| root.clone())
            .collect();
        for root in dependents {
            self.recompute_adjusted_multiplier(indexes, &root);
        }
    }

    /// Drops the election with the lowest adjusted multiplier to make
    /// room under `max_active_elections`.
    fn evict_lowest_priority(&self, indexes: &mut Indexes) {
        let weakest = indexes
            .by_multiplier
            .iter()
            .next_back()
            .map(|((rev_key, root), _)| (*rev_key, *root));
        if let Some((rev_key, root)) = weakest {
            indexes.by_multiplier.remove(&(rev_key, root));
            indexes.roots.remove(&root);
            indexes.blocks.retain(|_, r| *r != root);
            indexes.recently_dropped.push_back((root, Instant::now()));
            if indexes.recently_dropped.len() > self.config.recently_dropped_capacity {
                indexes.recently_dropped.pop_front();
            }
        }
    }

    /// Processes a vote: for every hash it covers, finds the owning
    /// election, rejects stale sequences, accumulates the tally, and
    /// confirms the election if quorum is reached.
    pub fn process_vote(&self, vote: &Vote) {
        self.recent_votes.insert(vote.clone());
        for hash in vote.payload.block_hashes() {
            let qualified_root = {
                let indexes = self.indexes.lock();
                indexes.blocks.get(&hash).cloned()
            };
            let Some(qualified_root) = qualified_root else {
                self.inactive_votes.insert(hash, vote.clone());
                continue;
            };
            let election = {
                let indexes = self.indexes.lock();
                indexes.roots.get(&qualified_root).cloned()
            };
            let Some(election) = election else { continue };

            let should_confirm = {
                let mut election = election.lock();
                if election.state == ElectionState::Confirmed || election.state == ElectionState::Stopped {
                    continue;
                }
                if let Some((last_sequence, _)) = election.last_votes.get(&vote.account) {
                    if vote.sequence <= *last_sequence {
                        continue;
                    }
                }
                election.last_votes.insert(vote.account, (vote.sequence, hash));
                let store = self.ledger.store();
                let online = store.online_weight().max(1);
                let quorum_threshold = (online as f64 * self.config.quorum_fraction) as Amount;
                let tally = election.tally(&|account| store.rep_weight(&account));
                tally.get(&hash).copied().unwrap_or(0) >= quorum_threshold
            };

            if should_confirm {
                self.confirm(&qualified_root, hash);
            }
        }
    }

    fn confirm(&self, qualified_root: &QualifiedRoot, winner: BlockHash) {
        let mut indexes = self.indexes.lock();
        let Some(election) = indexes.roots.remove(qualified_root) else { return };
        let old_multiplier = {
            let mut election = election.lock();
            election.state = ElectionState::Confirmed;
            election.confirmed_hash = Some(winner);
            election.adjusted_multiplier
        };
        indexes.by_multiplier.remove(&(multiplier_key(old_multiplier), qualified_root.clone()));
        let losers: Vec<BlockHash> = {
            let election = election.lock();
            election.blocks.keys().filter(|h| **h != winner).copied().collect()
        };
        for loser in losers {
            indexes.blocks.remove(&loser);
        }
        indexes.blocks.remove(&winner);

        indexes.recently_confirmed.push_back((qualified_root.clone(), winner));
        if indexes.recently_confirmed.len() > self.config.recently_confirmed_capacity {
            indexes.recently_confirmed.pop_front();
        }

        self.recompute_dependents(&mut indexes, winner);

        if let Some((_, sideband)) = self.ledger.store().block(&winner) {
            let mut batch = WriteBatch::new();
            batch.push(StoreOp::PutConfirmationHeight(
                sideband.account,
                ConfirmationHeightInfo { height: sideband.height, frontier_hash: winner },
            ));
            let _ = self.ledger.store().commit(batch);
            indexes.recently_cemented.push_back(ConfirmationResult {
                qualified_root: qualified_root.clone(),
                winner,
                height: sideband.height,
            });
            if indexes.recently_cemented.len() > self.config.recently_cemented_capacity {
                indexes.recently_cemented.pop_front();
            }
        }
    }

    /// Periodic maintenance: evicts elections past their TTL with no
    /// quorum, and returns the roots still active, ordered by adjusted
    /// multiplier descending, for the caller to build `confirm_req`
    /// batches from.
    pub fn tick(&self) -> Vec<QualifiedRoot> {
        let mut indexes = self.indexes.lock();
        let now = Instant::now();
        let ttl = self.config.election_ttl;
        let expired: Vec<QualifiedRoot> = indexes
            .roots
            .iter()
            .filter_map(|(root, election)| {
                let election = election.lock();
                (now.duration_since(election.started) > ttl).then(|| root.clone())
            })
            .collect();
        for root in expired {
            if let Some(election) = indexes.roots.remove(&root) {
                let mut election = election.lock();
                election.state = ElectionState::Expired;
                let multiplier = election.adjusted_multiplier;
                drop(election);
                indexes.by_multiplier.remove(&(multiplier_key(multiplier), root.clone()));
                indexes.blocks.retain(|_, r| *r != root);
            }
        }
        let sample = indexes
            .by_multiplier
            .keys()
            .next()
            .map(|&(rev, _)| f64::from_bits(rev.0))
            .unwrap_or(1.0);
        indexes.multipliers_cb.push_back(sample);
        if indexes.multipliers_cb.len() > MULTIPLIERS_CB_CAPACITY {
            indexes.multipliers_cb.pop_front();
        }

        indexes.by_multiplier.keys().map(|(_, root)| root.clone()).collect()
    }

    /// Trailing-window average of the highest active adjusted multiplier
    /// sampled on each `tick`, grounded on `multipliers_cb` in
    /// `original_source/oslo/node/active_transactions.hpp`.
    pub fn trended_active_multiplier(&self) -> f64 {
        let indexes = self.indexes.lock();
        if indexes.multipliers_cb.is_empty() {
            return 1.0;
        }
        indexes.multipliers_cb.iter().sum::<f64>() / indexes.multipliers_cb.len() as f64
    }

    pub fn active_count(&self) -> usize {
        self.indexes.lock().roots.len()
    }

    pub fn is_confirmed(&self, qualified_root: &QualifiedRoot) -> bool {
        self.indexes.lock().recently_confirmed.iter().any(|(r, _)| r == qualified_root)
    }

    pub fn winner_of(&self, qualified_root: &QualifiedRoot) -> Option<BlockHash> {
        self.indexes
            .lock()
            .recently_confirmed
            .iter()
            .rev()
            .find(|(r, _)| r == qualified_root)
            .map(|(_, winner)| *winner)
    }
}

/// Ancestor hashes an election's dependency-priority calculation needs:
/// just the block's own `previous`/source, since the chain beyond that
/// is reachable through the ledger once needed.
fn dependencies_of(block: &Block) -> HashSet<BlockHash> {
    let mut deps = HashSet::new();
    let previous = block.previous();
    if !previous.is_zero() {
        deps.insert(previous);
    }
    deps
}

impl<S: LedgerStore> ElectionSink for ActiveTransactions<S> {
    fn notify_progress(&self, block: &Block, _result: &ProcessResult, origin: AddOrigin) {
        if origin == AddOrigin::Bootstrap {
            return;
        }
        self.insert(block.clone(), self.ledger.work_threshold());
    }
}
