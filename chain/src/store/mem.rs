//! In-memory ledger store, used by unit and scenario tests.
//!
//! A plain `HashMap`-backed store wrapped in a `parking_lot::Mutex`,
//! since `LedgerStore` requires `Send + Sync`.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::block::{Block, Sideband};
use crate::error::StorageError;
use crate::store::{AccountInfo, ConfirmationHeightInfo, LedgerStore, PendingInfo, PendingKey, StoreOp, WriteBatch};
use crate::types::{Account, Amount, BlockHash, Hash};
use crate::vote::Vote;

#[derive(Default)]
struct Inner {
    accounts: HashMap<Account, AccountInfo>,
    blocks: HashMap<BlockHash, (Block, Sideband)>,
    pending: HashMap<PendingKey, PendingInfo>,
    confirmation_height: HashMap<Account, ConfirmationHeightInfo>,
    frontiers: HashMap<BlockHash, Account>,
    unchecked: HashMap<Hash, Vec<Block>>,
    rep_weight: HashMap<Account, i128>,
    online_weight: Amount,
    votes: HashMap<Account, Vote>,
}

pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        MemoryLedgerStore { inner: Mutex::new(Inner::default()) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn account_info(&self, account: &Account) -> Option<AccountInfo> {
        self.inner.lock().accounts.get(account).cloned()
    }

    fn block(&self, hash: &BlockHash) -> Option<(Block, Sideband)> {
        self.inner.lock().blocks.get(hash).cloned()
    }

    fn pending(&self, key: &PendingKey) -> Option<PendingInfo> {
        self.inner.lock().pending.get(key).copied()
    }

    fn confirmation_height(&self, account: &Account) -> Option<ConfirmationHeightInfo> {
        self.inner.lock().confirmation_height.get(account).copied()
    }

    fn frontier_account(&self, hash: &BlockHash) -> Option<Account> {
        self.inner.lock().frontiers.get(hash).copied()
    }

    fn unchecked(&self, dependency: &Hash) -> Vec<Block> {
        self.inner.lock().unchecked.get(dependency).cloned().unwrap_or_default()
    }

    fn has_any_pending(&self, account: &Account) -> bool {
        self.inner.lock().pending.keys().any(|k| k.destination == *account)
    }

    fn rep_weight(&self, representative: &Account) -> Amount {
        self.inner.lock().rep_weight.get(representative).copied().unwrap_or(0).max(0) as Amount
    }

    fn online_weight(&self) -> Amount {
        self.inner.lock().online_weight
    }

    fn latest_vote(&self, account: &Account) -> Option<Vote> {
        self.inner.lock().votes.get(account).cloned()
    }

    fn meta_version(&self) -> u32 {
        super::CURRENT_META_VERSION
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        for op in batch.ops {
            match op {
                StoreOp::PutAccountInfo(account, info) => {
                    inner.accounts.insert(account, info);
                }
                StoreOp::DeleteAccountInfo(account) => {
                    inner.accounts.remove(&account);
                }
                StoreOp::PutBlock(hash, block, sideband) => {
                    inner.blocks.insert(hash, (block, sideband));
                }
                StoreOp::DeleteBlock(hash) => {
                    inner.blocks.remove(&hash);
                }
                StoreOp::SetSuccessor(hash, successor) => {
                    if let Some((_, sideband)) = inner.blocks.get_mut(&hash) {
                        sideband.successor = successor;
                    }
                }
                StoreOp::PutPending(key, info) => {
                    inner.pending.insert(key, info);
                }
                StoreOp::DeletePending(key) => {
                    inner.pending.remove(&key);
                }
                StoreOp::PutUnchecked(dependency, block) => {
                    inner.unchecked.entry(dependency).or_default().push(block);
                }
                StoreOp::DeleteUnchecked(dependency, block_hash) => {
                    if let Some(list) = inner.unchecked.get_mut(&dependency) {
                        list.retain(|b| b.hash() != block_hash);
                        if list.is_empty() {
                            inner.unchecked.remove(&dependency);
                        }
                    }
                }
                StoreOp::PutConfirmationHeight(account, info) => {
                    inner.confirmation_height.insert(account, info);
                }
                StoreOp::PutFrontier(hash, account) => {
                    inner.frontiers.insert(hash, account);
                }
                StoreOp::DeleteFrontier(hash) => {
                    inner.frontiers.remove(&hash);
                }
                StoreOp::AdjustRepWeight(representative, delta) => {
                    let entry = inner.rep_weight.entry(representative).or_insert(0);
                    *entry += delta;
                }
                StoreOp::PutVote(account, vote) => {
                    inner.votes.insert(account, vote);
                }
                StoreOp::SetOnlineWeight(weight) => {
                    inner.online_weight = weight;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Epoch;

    #[test]
    fn commit_and_read_account_info() {
        let store = MemoryLedgerStore::new();
        let account = Account(Hash::digest(b"a"));
        let info = AccountInfo {
            head: BlockHash::ZERO,
            representative: account,
            open_block: BlockHash::ZERO,
            balance: 10,
            modified_timestamp: 1,
            block_count: 1,
            epoch: Epoch::Epoch0,
        };
        let mut batch = WriteBatch::new();
        batch.push(StoreOp::PutAccountInfo(account, info.clone()));
        store.commit(batch).unwrap();
        assert_eq!(store.account_info(&account), Some(info));
    }

    #[test]
    fn rep_weight_accumulates_deltas() {
        let store = MemoryLedgerStore::new();
        let rep = Account(Hash::digest(b"rep"));
        let mut batch = WriteBatch::new();
        batch.push(StoreOp::AdjustRepWeight(rep, 100));
        batch.push(StoreOp::AdjustRepWeight(rep, -30));
        store.commit(batch).unwrap();
        assert_eq!(store.rep_weight(&rep), 70);
    }

    #[test]
    fn unchecked_resolves_and_clears() {
        let store = MemoryLedgerStore::new();
        let dep = Hash::digest(b"missing");
        let block = Block::Receive {
            previous: BlockHash::ZERO,
            source: BlockHash(dep),
            signature: crate::types::Signature([0u8; 64]),
            work: 0,
        };
        let block_hash = block.hash();
        let mut batch = WriteBatch::new();
        batch.push(StoreOp::PutUnchecked(dep, block.clone()));
        store.commit(batch).unwrap();
        assert_eq!(store.unchecked(&dep), vec![block]);

        let mut batch = WriteBatch::new();
        batch.push(StoreOp::DeleteUnchecked(dep, block_hash));
        store.commit(batch).unwrap();
        assert!(store.unchecked(&dep).is_empty());
    }
}
