//! Ledger processor (C3): validates a block against prior state, commits
//! or rejects it, and maintains the representative-weight cache.
//!
//! Grounded directly on `original_source/oslo/secure/ledger.cpp` for
//! predicate ordering and rollback-cascade semantics.

use std::sync::Arc;

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use ed25519_dalek::Verifier;
use parking_lot::Mutex;

use crate::block::{Block, BlockDetails, Sideband};
use crate::config::LedgerConfig;
use crate::error::ProcessCode;
use crate::store::{AccountInfo, ConfirmationHeightInfo, LedgerStore, PendingInfo, PendingKey, StoreOp, WriteBatch};
use crate::types::{Account, Amount, BlockHash, Epoch, Hash};

/// Result of [`Ledger::process`]: the outcome code plus the account,
/// amount, pending-account, and prior-balance context needed to act on
/// it.
#[derive(Clone, Copy, Debug)]
pub struct ProcessResult {
    pub code: ProcessCode,
    pub verified: bool,
    pub account: Account,
    pub amount: Amount,
    pub pending_account: Account,
    pub previous_balance: Amount,
}

impl ProcessResult {
    fn rejected(code: ProcessCode) -> Self {
        ProcessResult {
            code,
            verified: false,
            account: Account(Hash::ZERO),
            amount: 0,
            pending_account: Account(Hash::ZERO),
            previous_balance: 0,
        }
    }
}

#[derive(Debug)]
pub enum RollbackError {
    BelowConfirmationHeight { account: Account, height: u64, confirmation_height: u64 },
    UnknownBlock,
}

/// Subtype of a state block, determined from its balance delta and link
/// field against the epoch-link sentinels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StateSubtype {
    Epoch(Epoch),
    Send,
    Receive,
    Change,
    Malformed,
}

pub struct Ledger<S: LedgerStore> {
    store: Arc<S>,
    config: LedgerConfig,
    /// Serializes calls to `process`/`rollback`: exactly one write
    /// transaction exists at any time.
    write_lock: Mutex<()>,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Ledger { store, config, write_lock: Mutex::new(()) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn work_threshold(&self) -> u64 {
        self.config.work_threshold
    }

    fn state_subtype(&self, link: &Hash, balance: Amount, previous_balance: Amount) -> StateSubtype {
        if *link == self.config.epoch_v1_link {
            return StateSubtype::Epoch(Epoch::Epoch1);
        }
        if *link == self.config.epoch_v2_link {
            return StateSubtype::Epoch(Epoch::Epoch2);
        }
        if balance < previous_balance {
            StateSubtype::Send
        } else if balance > previous_balance {
            StateSubtype::Receive
        } else if link.is_zero() {
            StateSubtype::Change
        } else {
            StateSubtype::Malformed
        }
    }

    /// Resolves the chain-owning account for a block. `Open`/`State`
    /// blocks self-describe it; legacy send/receive/change blocks do not,
    /// so it is read off the previous block's sideband. Returns `None`
    /// when that previous block does not exist (the caller treats this as
    /// `gap_previous`, since no signature check is possible without it).
    fn resolve_account(&self, block: &Block) -> Option<Account> {
        if let Some(account) = block.account_field() {
            return Some(account);
        }
        let previous = block.previous();
        if previous.is_zero() {
            return None;
        }
        self.store.block(&previous).map(|(_, sideband)| sideband.account)
    }

    fn verify_signature(signer: Account, hash: BlockHash, signature: &crate::types::Signature) -> bool {
        let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(signer.as_bytes()) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        verifying_key.verify(hash.as_bytes(), &sig).is_ok()
    }

    pub(crate) fn work_difficulty(hash: BlockHash, work: u64) -> u64 {
        let mut hasher = Blake2bVar::new(8).expect("8-byte BLAKE2b output is valid");
        hasher.update(&work.to_le_bytes());
        hasher.update(hash.as_bytes());
        let mut out = [0u8; 8];
        hasher.finalize_variable(&mut out).expect("output buffer matches requested digest length");
        u64::from_le_bytes(out)
    }

    /// Validates and, if valid, commits `block`. Runs inside one write
    /// transaction: either every effect of the commit path lands, or none
    /// do.
    pub fn process(&self, block: &Block) -> ProcessResult {
        let _guard = self.write_lock.lock();
        let hash = block.hash();

        // 1. old
        if self.store.block(&hash).is_some() {
            return ProcessResult::rejected(ProcessCode::Old);
        }

        // Account resolution. For legacy blocks this requires the
        // previous block to exist; if it doesn't, this is gap_previous in
        // practice even though predicate #4 is nominally later, because no
        // signer can be derived without it.
        let Some(owner_account) = self.resolve_account(block) else {
            return ProcessResult::rejected(ProcessCode::GapPrevious);
        };

        let existing_info = self.store.account_info(&owner_account);
        let previous_balance = existing_info.as_ref().map(|i| i.balance).unwrap_or(0);

        let subtype = match block {
            Block::State { balance, link, .. } => Some(self.state_subtype(link, *balance, previous_balance)),
            _ => None,
        };

        // 2. bad_signature
        let signer = match subtype {
            Some(StateSubtype::Epoch(Epoch::Epoch1)) => self.config.epoch_v1_signer,
            Some(StateSubtype::Epoch(Epoch::Epoch2)) => self.config.epoch_v2_signer,
            _ => owner_account,
        };
        if !Self::verify_signature(signer, hash, block.signature()) {
            return ProcessResult::rejected(ProcessCode::BadSignature);
        }

        // 3. opened_burn_account
        if owner_account.is_zero() {
            return ProcessResult::rejected(ProcessCode::OpenedBurnAccount);
        }

        // 4. gap_previous
        let previous = block.previous();
        if !previous.is_zero() && self.store.block(&previous).is_none() {
            return ProcessResult::rejected(ProcessCode::GapPrevious);
        }

        // Source hash for receive-shaped blocks, used by gap_source and
        // unreceivable below.
        let source_hash: Option<BlockHash> = match (block, subtype) {
            (Block::Receive { source, .. }, _) => Some(*source),
            (Block::Open { source, .. }, _) => Some(*source),
            (Block::State { link, .. }, Some(StateSubtype::Receive)) => Some(BlockHash(*link)),
            _ => None,
        };

        // 5. gap_source
        if let Some(source) = source_hash {
            if self.store.block(&source).is_none() {
                return ProcessResult::rejected(ProcessCode::GapSource);
            }
        }

        // 6. fork
        match &existing_info {
            Some(info) => {
                if previous != info.head {
                    return ProcessResult::rejected(ProcessCode::Fork);
                }
            }
            None => {
                if !previous.is_zero() {
                    return ProcessResult::rejected(ProcessCode::Fork);
                }
            }
        }

        // 7. unreceivable
        let pending_key = source_hash.map(|source| PendingKey { destination: owner_account, send_hash: source });
        let pending_info = pending_key.and_then(|key| self.store.pending(&key));
        if source_hash.is_some() {
            match &pending_info {
                None => return ProcessResult::rejected(ProcessCode::Unreceivable),
                Some(info) => {
                    // Legacy blocks (Receive/Open, not State) cannot
                    // consume a pending entry produced under an epoch
                    // greater than epoch_0.
                    let is_legacy = !matches!(block, Block::State { .. });
                    if is_legacy && info.epoch != Epoch::Epoch0 {
                        return ProcessResult::rejected(ProcessCode::Unreceivable);
                    }
                }
            }
        }

        // 8. negative_spend
        let is_send = matches!(block, Block::Send { .. }) || matches!(subtype, Some(StateSubtype::Send));
        let new_balance = block.balance_field().unwrap_or(previous_balance);
        if is_send && new_balance > previous_balance {
            return ProcessResult::rejected(ProcessCode::NegativeSpend);
        }

        // 9. balance_mismatch
        if let Some(info) = &pending_info {
            let delta = new_balance.saturating_sub(previous_balance);
            if delta != info.amount {
                return ProcessResult::rejected(ProcessCode::BalanceMismatch);
            }
        }
        if matches!(subtype, Some(StateSubtype::Epoch(_))) && new_balance != previous_balance {
            return ProcessResult::rejected(ProcessCode::BalanceMismatch);
        }

        // 10. representative_mismatch
        if matches!(subtype, Some(StateSubtype::Epoch(_))) {
            if let Some(info) = &existing_info {
                if let Some(rep) = block.representative_field() {
                    if rep != info.representative {
                        return ProcessResult::rejected(ProcessCode::RepresentativeMismatch);
                    }
                }
            }
        }

        // 11. block_position
        if let Some(StateSubtype::Epoch(target)) = subtype {
            let current_epoch = existing_info.as_ref().map(|i| i.epoch);
            match current_epoch {
                Some(current) => {
                    if current.next() != Some(target) {
                        return ProcessResult::rejected(ProcessCode::BlockPosition);
                    }
                }
                None => {
                    if target != Epoch::Epoch1 || !self.store.has_any_pending(&owner_account) {
                        return ProcessResult::rejected(ProcessCode::BlockPosition);
                    }
                }
            }
        }
        if matches!(subtype, Some(StateSubtype::Malformed)) {
            return ProcessResult::rejected(ProcessCode::BlockPosition);
        }
        // Legacy block bodies have no epoch field of their own; once an
        // account's chain has moved past epoch_0 only state blocks can
        // extend it.
        if subtype.is_none() {
            if let Some(info) = &existing_info {
                if info.epoch != Epoch::Epoch0 {
                    return ProcessResult::rejected(ProcessCode::BlockPosition);
                }
            }
        }

        // 12. insufficient_work
        if Self::work_difficulty(hash, block.work()) < self.config.work_threshold {
            return ProcessResult::rejected(ProcessCode::InsufficientWork);
        }

        // 13. progress
        self.commit_progress(block, hash, owner_account, &existing_info, new_balance, subtype, pending_key, &pending_info);

        ProcessResult {
            code: ProcessCode::Progress,
            verified: true,
            account: owner_account,
            amount: new_balance.abs_diff(previous_balance),
            pending_account: pending_info.map(|i| i.source_account).unwrap_or(Account(Hash::ZERO)),
            previous_balance,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_progress(
        &self,
        block: &Block,
        hash: BlockHash,
        owner_account: Account,
        existing_info: &Option<AccountInfo>,
        new_balance: Amount,
        subtype: Option<StateSubtype>,
        pending_key: Option<PendingKey>,
        pending_info: &Option<PendingInfo>,
    ) {
        let mut batch = WriteBatch::new();
        let now = current_timestamp();
        let height = existing_info.as_ref().map(|i| i.block_count + 1).unwrap_or(1);
        let epoch = match subtype {
            Some(StateSubtype::Epoch(target)) => target,
            _ => existing_info.as_ref().map(|i| i.epoch).unwrap_or(Epoch::Epoch0),
        };
        let is_send = matches!(block, Block::Send { .. }) || matches!(subtype, Some(StateSubtype::Send));
        let is_receive = matches!(block, Block::Receive { .. } | Block::Open { .. }) || matches!(subtype, Some(StateSubtype::Receive));
        let is_epoch = matches!(subtype, Some(StateSubtype::Epoch(_)));

        let sideband = Sideband {
            successor: BlockHash::ZERO,
            account: owner_account,
            balance: new_balance,
            height,
            timestamp: now,
            details: BlockDetails { epoch, is_send, is_receive, is_epoch },
        };
        batch.push(StoreOp::PutBlock(hash, block.clone(), sideband));

        if !block.previous().is_zero() {
            batch.push(StoreOp::SetSuccessor(block.previous(), hash));
        }

        let representative = block
            .representative_field()
            .or_else(|| existing_info.as_ref().map(|i| i.representative))
            .unwrap_or(owner_account);
        let new_info = AccountInfo {
            head: hash,
            representative,
            open_block: existing_info.as_ref().map(|i| i.open_block).unwrap_or(hash),
            balance: new_balance,
            modified_timestamp: now,
            block_count: height,
            epoch,
        };

        if let Some(old_info) = existing_info {
            if old_info.representative != representative {
                batch.push(StoreOp::AdjustRepWeight(old_info.representative, -(old_info.balance as i128)));
                batch.push(StoreOp::AdjustRepWeight(representative, new_balance as i128));
            } else if old_info.balance != new_balance {
                batch.push(StoreOp::AdjustRepWeight(representative, new_balance as i128 - old_info.balance as i128));
            }
        } else {
            batch.push(StoreOp::AdjustRepWeight(representative, new_balance as i128));
        }

        batch.push(StoreOp::PutAccountInfo(owner_account, new_info));

        if is_send {
            let destination = match block {
                Block::Send { destination, .. } => *destination,
                Block::State { link, .. } => Account(*link),
                _ => unreachable!("only Send/State blocks are classified is_send"),
            };
            let amount = existing_info.as_ref().map(|i| i.balance).unwrap_or(0) - new_balance;
            batch.push(StoreOp::PutPending(
                PendingKey { destination, send_hash: hash },
                PendingInfo { source_account: owner_account, amount, epoch },
            ));
            // Legacy chains (not state) still populate the frontier table
            // so bootstrap-style frontier scans keep working.
            if !matches!(block, Block::State { .. }) {
                if let Some(old_info) = existing_info {
                    batch.push(StoreOp::DeleteFrontier(old_info.head));
                }
                batch.push(StoreOp::PutFrontier(hash, owner_account));
            }
        } else if let (Some(key), Some(info)) = (pending_key, pending_info) {
            let _ = info;
            batch.push(StoreOp::DeletePending(key));
        }

        if !matches!(block, Block::State { .. }) && !is_send {
            if let Some(old_info) = existing_info {
                batch.push(StoreOp::DeleteFrontier(old_info.head));
            }
            batch.push(StoreOp::PutFrontier(hash, owner_account));
        }

        self.store.commit(batch).expect("ledger commit must succeed or panic: storage failure is a consistency error");
    }

    /// Pops the head of `account`'s chain back to (but not including)
    /// `target`, cascading into any account whose pending entry the
    /// popped blocks produced. Rejected if any popped block is at or below
    /// its account's confirmation height.
    pub fn rollback(&self, target: BlockHash) -> Result<(), RollbackError> {
        let _guard = self.write_lock.lock();
        let Some((target_block, target_sideband)) = self.store.block(&target) else {
            return Err(RollbackError::UnknownBlock);
        };
        let account = target_sideband.account;
        let info = self.store.account_info(&account).expect("block exists implies account_info exists");
        let confirmation_height = self
            .store
            .confirmation_height(&account)
            .map(|c| c.height)
            .unwrap_or(0);
        if target_sideband.height <= confirmation_height {
            return Err(RollbackError::BelowConfirmationHeight {
                account,
                height: target_sideband.height,
                confirmation_height,
            });
        }

        let mut batch = WriteBatch::new();
        let mut current_hash = info.head;
        let mut current_info = info;
        loop {
            let (current_block, current_sideband) = self.store.block(&current_hash).expect("chain block must exist");
            self.rollback_one(&mut batch, &current_block, &current_sideband);

            let previous = current_block.previous();
            if current_hash == target {
                if previous.is_zero() {
                    batch.push(StoreOp::DeleteAccountInfo(account));
                } else {
                    let (_, previous_sideband) = self.store.block(&previous).expect("previous must exist");
                    batch.push(StoreOp::PutAccountInfo(
                        account,
                        AccountInfo {
                            head: previous,
                            representative: self.representative_as_of(previous),
                            open_block: current_info.open_block,
                            balance: previous_sideband.balance,
                            modified_timestamp: current_timestamp(),
                            block_count: current_sideband.height - 1,
                            epoch: previous_sideband.details.epoch,
                        },
                    ));
                }
                break;
            }
            current_info.head = previous;
            current_hash = previous;
        }

        self.store.commit(batch).expect("rollback commit must succeed or panic: storage failure is a consistency error");
        Ok(())
    }

    /// Walks back from `hash` to find the representative in effect at that
    /// point in the chain (the nearest block, inclusive, that sets one;
    /// send/receive blocks do not change it).
    fn representative_as_of(&self, mut hash: BlockHash) -> Account {
        loop {
            let (block, _) = self.store.block(&hash).expect("chain block must exist");
            if let Some(rep) = block.representative_field() {
                return rep;
            }
            let previous = block.previous();
            if previous.is_zero() {
                return block.account_field().unwrap_or(Account(Hash::ZERO));
            }
            hash = previous;
        }
    }

    fn rollback_one(&self, batch: &mut WriteBatch, block: &Block, sideband: &Sideband) {
        let hash = block.hash();
        batch.push(StoreOp::DeleteBlock(hash));
        let previous = block.previous();
        if !previous.is_zero() {
            batch.push(StoreOp::SetSuccessor(previous, BlockHash::ZERO));
        }

        // Reverse the representative-weight adjustment this block made at
        // commit time by recomputing what the chain looked like just
        // before it and applying the opposite delta.
        let (prev_balance, prev_representative) = if previous.is_zero() {
            (0u128, sideband.account)
        } else {
            let (_, prev_sideband) = self.store.block(&previous).expect("previous must exist");
            (prev_sideband.balance, self.representative_as_of(previous))
        };
        let current_representative = block.representative_field().unwrap_or(prev_representative);
        if current_representative != prev_representative {
            batch.push(StoreOp::AdjustRepWeight(current_representative, -(sideband.balance as i128)));
            batch.push(StoreOp::AdjustRepWeight(prev_representative, prev_balance as i128));
        } else if prev_balance != sideband.balance {
            batch.push(StoreOp::AdjustRepWeight(current_representative, prev_balance as i128 - sideband.balance as i128));
        }

        if sideband.details.is_send {
            let destination = match block {
                Block::Send { destination, .. } => *destination,
                Block::State { link, .. } => Account(*link),
                _ => return,
            };
            batch.push(StoreOp::DeletePending(PendingKey { destination, send_hash: hash }));
        }
    }
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use crate::types::Signature;
    use ed25519_dalek::{SigningKey, Signer};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, Account) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let account = Account(Hash(signing_key.verifying_key().to_bytes()));
        (signing_key, account)
    }

    fn sign(key: &SigningKey, hash: BlockHash) -> Signature {
        let sig = key.sign(hash.as_bytes());
        Signature(sig.to_bytes())
    }

    fn ledger() -> Ledger<MemoryLedgerStore> {
        Ledger::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default())
    }

    #[test]
    fn send_then_open_round_trip() {
        let ledger = ledger();
        let (genesis_key, genesis) = keypair();
        let (dest_key, dest) = keypair();

        let mut genesis_open = Block::State {
            account: genesis,
            previous: BlockHash::ZERO,
            representative: genesis,
            balance: 1_000_000,
            link: Hash::ZERO,
            signature: Signature::default(),
            work: 0,
        };
        let h = genesis_open.hash();
        genesis_open.set_signature(sign(&genesis_key, h));
        genesis_open.set_work(find_work(&ledger, h));
        let result = ledger.process(&genesis_open);
        assert!(result.code.is_progress(), "{:?}", result.code);

        let mut send = Block::State {
            account: genesis,
            previous: h,
            representative: genesis,
            balance: 900_000,
            link: dest.0,
            signature: Signature::default(),
            work: 0,
        };
        let send_hash = send.hash();
        send.set_signature(sign(&genesis_key, send_hash));
        send.set_work(find_work(&ledger, send_hash));
        let result = ledger.process(&send);
        assert!(result.code.is_progress(), "{:?}", result.code);
        assert_eq!(ledger.store().rep_weight(&genesis), 900_000);

        let mut open = Block::State {
            account: dest,
            previous: BlockHash::ZERO,
            representative: dest,
            balance: 100_000,
            link: send_hash.0,
            signature: Signature::default(),
            work: 0,
        };
        let open_hash = open.hash();
        open.set_signature(sign(&dest_key, open_hash));
        open.set_work(find_work(&ledger, open_hash));
        let result = ledger.process(&open);
        assert!(result.code.is_progress(), "{:?}", result.code);
        assert_eq!(ledger.store().rep_weight(&dest), 100_000);
        assert!(ledger.store().pending(&PendingKey { destination: dest, send_hash }).is_none());
    }

    #[test]
    fn duplicate_block_is_old() {
        let ledger = ledger();
        let (key, account) = keypair();
        let mut block = Block::State {
            account,
            previous: BlockHash::ZERO,
            representative: account,
            balance: 1,
            link: Hash::ZERO,
            signature: Signature::default(),
            work: 0,
        };
        let h = block.hash();
        block.set_signature(sign(&key, h));
        block.set_work(find_work(&ledger, h));
        assert!(ledger.process(&block).code.is_progress());
        assert_eq!(ledger.process(&block).code, ProcessCode::Old);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let ledger = ledger();
        let (_key, account) = keypair();
        let (other_key, _other_account) = keypair();
        let mut block = Block::State {
            account,
            previous: BlockHash::ZERO,
            representative: account,
            balance: 1,
            link: Hash::ZERO,
            signature: Signature::default(),
            work: 0,
        };
        let h = block.hash();
        block.set_signature(sign(&other_key, h));
        block.set_work(find_work(&ledger, h));
        assert_eq!(ledger.process(&block).code, ProcessCode::BadSignature);
    }

    /// Brute-forces a work value meeting the default threshold; the default
    /// threshold is low enough that this terminates quickly in tests.
    fn find_work<S: LedgerStore>(ledger: &Ledger<S>, hash: BlockHash) -> u64 {
        for work in 0u64..1_000_000 {
            if Ledger::<S>::work_difficulty(hash, work) >= ledger.config.work_threshold {
                return work;
            }
        }
        panic!("no work value found under the test threshold");
    }
}
