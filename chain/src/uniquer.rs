//! Generic content-addressed de-duplication for shared block/vote
//! instances.
//!
//! Models the cache as `Hash -> Weak<T>`, returns an `Arc<T>` on lookup,
//! and samples the map for stale entries on insert rather than scanning
//! it in full. Generic over `T` rather than hardcoded to one concrete
//! block shape, matching how the ledger's storage traits stay generic
//! over a trait rather than a single implementation.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::types::Hash;

/// Number of map entries inspected (and evicted, if stale) per insertion.
/// Keeps the sweep cost bounded regardless of map size.
const SWEEP_SAMPLE_SIZE: usize = 32;

pub struct Uniquer<T> {
    entries: Mutex<HashMap<Hash, Weak<T>>>,
}

impl<T> Uniquer<T> {
    pub fn new() -> Self {
        Uniquer { entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the canonical shared instance for `key`: an existing live
    /// `Arc<T>` if one is cached, otherwise `value` wrapped and cached for
    /// future lookups.
    pub fn unique(&self, key: Hash, value: T) -> Arc<T> {
        let mut entries = self.entries.lock();
        if let Some(weak) = entries.get(&key) {
            if let Some(arc) = weak.upgrade() {
                return arc;
            }
        }
        let arc = Arc::new(value);
        entries.insert(key, Arc::downgrade(&arc));
        Self::sweep(&mut entries);
        arc
    }

    pub fn get(&self, key: &Hash) -> Option<Arc<T>> {
        self.entries.lock().get(key).and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts up to [`SWEEP_SAMPLE_SIZE`] dead entries, sampled from
    /// whatever the map's iteration order happens to hand back first
    /// rather than a full scan.
    fn sweep(entries: &mut HashMap<Hash, Weak<T>>) {
        let dead: Vec<Hash> = entries
            .iter()
            .take(SWEEP_SAMPLE_SIZE)
            .filter(|(_, weak)| weak.strong_count() == 0)
            .map(|(k, _)| *k)
            .collect();
        for key in dead {
            entries.remove(&key);
        }
    }
}

impl<T> Default for Uniquer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_returns_same_instance_while_alive() {
        let uniquer: Uniquer<String> = Uniquer::new();
        let key = Hash::digest(b"key");
        let a = uniquer.unique(key, "value".to_string());
        let b = uniquer.unique(key, "other".to_string());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, "value");
    }

    #[test]
    fn unique_replaces_after_all_strong_refs_drop() {
        let uniquer: Uniquer<String> = Uniquer::new();
        let key = Hash::digest(b"key");
        {
            let a = uniquer.unique(key, "value".to_string());
            drop(a);
        }
        let b = uniquer.unique(key, "replacement".to_string());
        assert_eq!(*b, "replacement");
    }

    #[test]
    fn sweep_evicts_dead_entries_over_many_insertions() {
        let uniquer: Uniquer<u32> = Uniquer::new();
        for i in 0..(SWEEP_SAMPLE_SIZE as u32 * 4) {
            let key = Hash::digest(&i.to_be_bytes());
            let arc = uniquer.unique(key, i);
            drop(arc);
        }
        assert!(uniquer.len() < SWEEP_SAMPLE_SIZE * 4);
    }
}
