//! Storage abstraction over the ledger's tables.
//!
//! A minimal get/put-a-block-plus-tip interface, generalized to the
//! ledger's full table set: accounts, frontiers, per-type block bodies,
//! pending, unchecked, vote, online_weight, meta, and
//! confirmation_height. Two implementations are provided:
//! [`mem::MemoryLedgerStore`] and [`rocksdb_store::RocksDbLedgerStore`].

pub mod mem;
pub mod rocksdb_store;

pub use mem::MemoryLedgerStore;
pub use rocksdb_store::{RocksDbConfig, RocksDbLedgerStore};

use serde::{Deserialize, Serialize};

use crate::block::{Block, Sideband};
use crate::error::StorageError;
use crate::types::{Account, Amount, BlockHash, Epoch, Hash};
use crate::vote::Vote;

/// Per-account head-of-chain state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub representative: Account,
    pub open_block: BlockHash,
    pub balance: Amount,
    pub modified_timestamp: u64,
    pub block_count: u64,
    pub epoch: Epoch,
}

/// Keys a pending (unreceived send) entry by `(destination, send_hash)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PendingKey {
    pub destination: Account,
    pub send_hash: BlockHash,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PendingInfo {
    pub source_account: Account,
    pub amount: Amount,
    pub epoch: Epoch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier_hash: BlockHash,
}

/// One write transaction's worth of mutations, applied atomically by
/// [`LedgerStore::commit`]. Built up by the ledger processor and flushed
/// in a single call so storage failures mid-batch commit nothing.
#[derive(Default)]
pub struct WriteBatch {
    pub ops: Vec<StoreOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug)]
pub enum StoreOp {
    PutAccountInfo(Account, AccountInfo),
    DeleteAccountInfo(Account),
    PutBlock(BlockHash, Block, Sideband),
    DeleteBlock(BlockHash),
    /// Updates only the `successor` field of an already-stored block's
    /// sideband, leaving the body untouched.
    SetSuccessor(BlockHash, BlockHash),
    PutPending(PendingKey, PendingInfo),
    DeletePending(PendingKey),
    /// Queues `block` under the hash of the dependency it is waiting on.
    PutUnchecked(Hash, Block),
    /// Removes one queued block for `dependency` once it resolves.
    DeleteUnchecked(Hash, BlockHash),
    PutConfirmationHeight(Account, ConfirmationHeightInfo),
    PutFrontier(BlockHash, Account),
    DeleteFrontier(BlockHash),
    /// Adjusts the cached weight for `representative` by a signed delta.
    AdjustRepWeight(Account, i128),
    PutVote(Account, Vote),
    SetOnlineWeight(Amount),
}

/// Abstract key-value store backing the ledger. All reads are lock-free
/// with respect to writers; the single-writer rule is enforced by
/// [`crate::ledger::Ledger`] serializing calls to [`LedgerStore::commit`],
/// not by this trait itself.
pub trait LedgerStore: Send + Sync {
    fn account_info(&self, account: &Account) -> Option<AccountInfo>;
    fn block(&self, hash: &BlockHash) -> Option<(Block, Sideband)>;
    fn pending(&self, key: &PendingKey) -> Option<PendingInfo>;
    fn confirmation_height(&self, account: &Account) -> Option<ConfirmationHeightInfo>;
    fn frontier_account(&self, hash: &BlockHash) -> Option<Account>;
    /// Blocks quarantined awaiting the dependency hashed `dependency`.
    fn unchecked(&self, dependency: &Hash) -> Vec<Block>;
    /// Whether `account` has at least one pending entry, regardless of
    /// which send produced it. Used by the epoch-block-on-unopened-account
    /// boundary rule.
    fn has_any_pending(&self, account: &Account) -> bool;
    fn rep_weight(&self, representative: &Account) -> Amount;
    fn online_weight(&self) -> Amount;
    fn latest_vote(&self, account: &Account) -> Option<Vote>;
    /// Schema version stored in the `meta` table; advanced by one per
    /// migration. No migrations are implemented; readers may assume the
    /// current version.
    fn meta_version(&self) -> u32;

    /// Atomically applies every op in `batch`.
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

pub const CURRENT_META_VERSION: u32 = 1;
