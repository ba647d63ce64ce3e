//! Vote caches (C5): a bounded ring of the most recent vote seen per
//! representative per block, and a separate cache for votes that arrive
//! before their block has an election.
//!
//! Grounded on `original_source/oslo/node/voting.cpp`'s
//! `vote_cache`/`inactive_cache` split.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::types::{Account, BlockHash};
use crate::vote::Vote;

/// Ring of `block_hash -> votes`, one entry per representative per hash.
/// A later vote from the same representative on the same hash replaces
/// the earlier one rather than appending. Capacity scales inversely with
/// the number of local voting representatives, since more local
/// representatives each produce their own vote for the same hash.
pub struct RecentVoteCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    /// FIFO eviction order of hashes, so the oldest cached hash is
    /// dropped first once capacity is exceeded.
    order: VecDeque<BlockHash>,
    votes: HashMap<BlockHash, HashMap<Account, Vote>>,
}

impl RecentVoteCache {
    /// `local_voting_reps` is the number of representatives this node
    /// votes on behalf of; capacity shrinks as that grows, floored at a
    /// workable minimum.
    pub fn new(base_capacity: usize, local_voting_reps: usize) -> Self {
        let capacity = (base_capacity / local_voting_reps.max(1)).max(64);
        RecentVoteCache {
            capacity,
            inner: Mutex::new(Inner { order: VecDeque::new(), votes: HashMap::new() }),
        }
    }

    /// Inserts `vote`, associating it with every hash it covers.
    /// Replaces any prior vote by the same representative for that hash.
    pub fn insert(&self, vote: Vote) {
        let mut inner = self.inner.lock();
        for hash in vote.payload.block_hashes() {
            let is_new_hash = !inner.votes.contains_key(&hash);
            let entry = inner.votes.entry(hash).or_default();
            entry.insert(vote.account, vote.clone());
            if is_new_hash {
                inner.order.push_back(hash);
            }
        }
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.votes.remove(&evicted);
            }
        }
    }

    /// All cached votes for `hash`, most recent per representative.
    pub fn votes_for(&self, hash: &BlockHash) -> Vec<Vote> {
        self.inner
            .lock()
            .votes
            .get(hash)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.inner.lock().votes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Votes for a block that does not yet have an election, retained by
/// block hash together with the set of voters. Consulted when an
/// election for that block starts, to seed its initial tally.
pub struct InactiveVoteCache {
    capacity: usize,
    inner: Mutex<InactiveInner>,
}

struct InactiveInner {
    order: VecDeque<BlockHash>,
    entries: HashMap<BlockHash, HashMap<Account, Vote>>,
}

impl InactiveVoteCache {
    pub fn new(capacity: usize) -> Self {
        InactiveVoteCache {
            capacity,
            inner: Mutex::new(InactiveInner { order: VecDeque::new(), entries: HashMap::new() }),
        }
    }

    pub fn insert(&self, hash: BlockHash, vote: Vote) {
        let mut inner = self.inner.lock();
        let is_new = !inner.entries.contains_key(&hash);
        inner.entries.entry(hash).or_default().insert(vote.account, vote);
        if is_new {
            inner.order.push_back(hash);
        }
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
    }

    /// Removes and returns every vote cached for `hash`, consumed once
    /// an election starts for it.
    pub fn take(&self, hash: &BlockHash) -> Vec<Vote> {
        let mut inner = self.inner.lock();
        inner.order.retain(|h| h != hash);
        inner.entries.remove(hash).map(|m| m.into_values().collect()).unwrap_or_default()
    }

    pub fn voter_count(&self, hash: &BlockHash) -> usize {
        self.inner.lock().entries.get(hash).map(HashMap::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash;
    use crate::vote::VotePayload;

    fn vote(account: Account, hash: BlockHash, sequence: u64) -> Vote {
        Vote {
            account,
            signature: crate::types::Signature::default(),
            sequence,
            payload: VotePayload::Hashes(vec![hash]),
        }
    }

    #[test]
    fn recent_cache_replaces_vote_by_same_representative() {
        let cache = RecentVoteCache::new(1024, 1);
        let rep = Account(Hash::digest(b"rep"));
        let hash = BlockHash(Hash::digest(b"block"));
        cache.insert(vote(rep, hash, 1));
        cache.insert(vote(rep, hash, 2));
        let votes = cache.votes_for(&hash);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].sequence, 2);
    }

    #[test]
    fn recent_cache_capacity_scales_with_local_reps() {
        let solo = RecentVoteCache::new(1000, 1);
        let many = RecentVoteCache::new(1000, 10);
        assert!(many.capacity < solo.capacity);
    }

    #[test]
    fn inactive_cache_take_clears_entry() {
        let cache = InactiveVoteCache::new(100);
        let rep = Account(Hash::digest(b"rep"));
        let hash = BlockHash(Hash::digest(b"block"));
        cache.insert(hash, vote(rep, hash, 1));
        assert_eq!(cache.voter_count(&hash), 1);
        let taken = cache.take(&hash);
        assert_eq!(taken.len(), 1);
        assert_eq!(cache.voter_count(&hash), 0);
    }
}
