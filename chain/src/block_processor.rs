//! Block processor (C4): the single-consumer pipeline that takes
//! newly-seen blocks from peers, the active engine, or an operator and
//! drives them through [`crate::ledger::Ledger::process`] in batches.
//!
//! Generalized into three queues (blocking, forced, unchecked) instead
//! of one linear import path, following
//! `original_source/oslo/node/blockprocessor.cpp` for the
//! batch/forced-path/unchecked shape. The worker loop pairs a
//! `parking_lot::Mutex` with a `parking_lot::Condvar` (std's `Condvar`
//! only accepts a `std::sync::MutexGuard`), per the condition-
//! variable-worker design note.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use ed25519_dalek::Verifier;
use parking_lot::{Condvar, Mutex};

use crate::block::Block;
use crate::config::BlockProcessorConfig;
use crate::error::ProcessCode;
use crate::ledger::{Ledger, ProcessResult};
use crate::metrics::LedgerMetrics;
use crate::store::{LedgerStore, StoreOp, WriteBatch};
use crate::types::{BlockHash, Hash};

/// Where a block entering the processor came from; carried through so
/// the live hook can decide whether an election should be created (only
/// recently-originated, non-bootstrap blocks get one).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddOrigin {
    Live,
    Bootstrap,
    Local,
}

/// Receives progress notifications so the active engine can create or
/// update an election without the block processor depending on it
/// directly (the dependency runs the other way: `active` depends on
/// `block_processor`, not vice versa).
pub trait ElectionSink: Send + Sync {
    fn notify_progress(&self, block: &Block, result: &ProcessResult, origin: AddOrigin);
}

struct Queued {
    block: Block,
    origin: AddOrigin,
    forced: bool,
}

struct State {
    /// State/Open blocks awaiting batch signature verification.
    signature_pending: VecDeque<Queued>,
    main: VecDeque<Queued>,
    forced: VecDeque<Queued>,
    stopped: bool,
}

pub struct BlockProcessor<S: LedgerStore> {
    ledger: Arc<Ledger<S>>,
    config: BlockProcessorConfig,
    state: Mutex<State>,
    condvar: Condvar,
    election_sink: Mutex<Option<Arc<dyn ElectionSink>>>,
    metrics: Mutex<Option<Arc<LedgerMetrics>>>,
}

impl<S: LedgerStore> BlockProcessor<S> {
    pub fn new(ledger: Arc<Ledger<S>>, config: BlockProcessorConfig) -> Self {
        BlockProcessor {
            ledger,
            config,
            state: Mutex::new(State {
                signature_pending: VecDeque::new(),
                main: VecDeque::new(),
                forced: VecDeque::new(),
                stopped: false,
            }),
            condvar: Condvar::new(),
            election_sink: Mutex::new(None),
            metrics: Mutex::new(None),
        }
    }

    pub fn set_election_sink(&self, sink: Arc<dyn ElectionSink>) {
        *self.election_sink.lock() = Some(sink);
    }

    pub fn set_metrics(&self, metrics: Arc<LedgerMetrics>) {
        *self.metrics.lock() = Some(metrics);
    }

    /// Queue length the back-pressure checks below are measured against:
    /// the sum of all three internal queues.
    fn total_len(state: &State) -> usize {
        state.signature_pending.len() + state.main.len() + state.forced.len()
    }

    pub fn full(&self) -> bool {
        Self::total_len(&self.state.lock()) >= self.config.full_queue_size
    }

    pub fn half_full(&self) -> bool {
        Self::total_len(&self.state.lock()) >= self.config.half_full_queue_size
    }

    /// Admits a new block. Returns `false` (the admission is dropped) if
    /// the processor is already full.
    pub fn add(&self, block: Block, origin: AddOrigin) -> bool {
        let mut state = self.state.lock();
        if Self::total_len(&state) >= self.config.full_queue_size {
            return false;
        }
        let queued = Queued { block, origin, forced: false };
        if needs_signature_precheck(&queued.block) {
            state.signature_pending.push_back(queued);
        } else {
            state.main.push_back(queued);
        }
        drop(state);
        self.condvar.notify_one();
        true
    }

    /// Admits an operator-forced replacement: bypasses the signature
    /// pre-check queue and is drained ahead of ordinary admissions.
    pub fn add_forced(&self, block: Block) {
        let mut state = self.state.lock();
        state.forced.push_back(Queued { block, origin: AddOrigin::Local, forced: true });
        drop(state);
        self.condvar.notify_one();
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.condvar.notify_all();
    }

    /// Runs the consumer loop until [`Self::stop`] is called. Each
    /// iteration blocks for up to `batch_deadline` waiting for new work,
    /// then drains whatever is available.
    pub fn run(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if state.stopped {
                    return;
                }
                if Self::total_len(&state) == 0 {
                    let result = self
                        .condvar
                        .wait_for(&mut state, self.config.batch_deadline);
                    if result.timed_out() && Self::total_len(&state) == 0 {
                        if state.stopped {
                            return;
                        }
                        continue;
                    }
                }
            }
            self.drain_batch();
        }
    }

    /// Verifies signatures for every queued State/Open block, discarding
    /// ones that fail outright, and moves the rest into the main queue.
    /// A real worker pool would parallelize this; it is modeled here as
    /// a single batch pass since the pre-check and the ledger's own
    /// signature check are otherwise identical work.
    fn verify_pending_signatures(&self, state: &mut State) {
        let deadline = Instant::now() + self.config.batch_deadline;
        while let Some(queued) = state.signature_pending.pop_front() {
            if precheck_signature(&queued.block) {
                state.main.push_back(queued);
            }
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    /// Drains a bounded prefix of the forced and main queues under one
    /// logical batch, returning the ledger's result for each block
    /// attempted.
    pub fn drain_batch(&self) -> Vec<ProcessResult> {
        let mut state = self.state.lock();
        self.verify_pending_signatures(&mut state);

        let mut batch = Vec::with_capacity(self.config.max_batch_size);
        while batch.len() < self.config.max_batch_size {
            if let Some(q) = state.forced.pop_front() {
                batch.push(q);
                continue;
            }
            if let Some(q) = state.main.pop_front() {
                batch.push(q);
                continue;
            }
            break;
        }
        drop(state);

        let batch_start = Instant::now();
        let mut results = Vec::with_capacity(batch.len());
        for queued in batch {
            if queued.forced {
                self.process_forced(&queued.block);
            }
            let result = self.ledger.process(&queued.block);
            if let Some(metrics) = self.metrics.lock().clone() {
                metrics.record_process_result(result.code);
            }
            self.handle_result(&queued.block, &result, queued.origin);
            results.push(result);
        }
        if let Some(metrics) = self.metrics.lock().clone() {
            metrics.block_processor_batch_seconds.observe(batch_start.elapsed().as_secs_f64());
        }
        results
    }

    /// Rolls back any existing chain at the incoming block's root before
    /// the forced replacement is processed, stopping at confirmation
    /// height.
    fn process_forced(&self, block: &Block) {
        let previous = block.previous();
        if previous.is_zero() {
            return;
        }
        if let Some((_, sideband)) = self.ledger.store().block(&previous) {
            if let Some(info) = self.ledger.store().account_info(&sideband.account) {
                if info.head != previous {
                    let _ = self.ledger.rollback(info.head);
                }
            }
        }
    }

    fn handle_result(&self, block: &Block, result: &ProcessResult, origin: AddOrigin) {
        match result.code {
            ProcessCode::GapPrevious => {
                self.quarantine(block, block.previous().0);
            }
            ProcessCode::GapSource => {
                if let Some(source) = source_hash(block) {
                    self.quarantine(block, source.0);
                }
            }
            ProcessCode::Progress => {
                self.resolve_unchecked(block.hash());
                if let Some(sink) = self.election_sink.lock().clone() {
                    sink.notify_progress(block, result, origin);
                }
            }
            _ => {}
        }
    }

    fn quarantine(&self, block: &Block, dependency: Hash) {
        let mut write_batch = WriteBatch::new();
        write_batch.push(StoreOp::PutUnchecked(dependency, block.clone()));
        let _ = self.ledger.store().commit(write_batch);
    }

    /// Re-enqueues every block that was quarantined awaiting `hash` now
    /// that it has committed, placing them at the front of the main
    /// queue so they are retried before newer admissions.
    fn resolve_unchecked(&self, hash: BlockHash) {
        let waiting = self.ledger.store().unchecked(&hash.0);
        if waiting.is_empty() {
            return;
        }
        let mut write_batch = WriteBatch::new();
        let mut state = self.state.lock();
        for block in waiting {
            write_batch.push(StoreOp::DeleteUnchecked(hash.0, block.hash()));
            state.main.push_front(Queued { block, origin: AddOrigin::Live, forced: false });
        }
        drop(state);
        let _ = self.ledger.store().commit(write_batch);
        self.condvar.notify_one();
    }
}

fn needs_signature_precheck(block: &Block) -> bool {
    matches!(block, Block::State { .. } | Block::Open { .. })
}

/// Batch signature pre-check for self-describing blocks: State and Open
/// blocks carry their own signer account, so the signature can be
/// checked before the block is even looked up in the ledger. Legacy
/// Send/Receive/Change blocks cannot be pre-checked this way since
/// their signer is only known once their `previous` block resolves, so
/// they skip this queue entirely and are checked by
/// `Ledger::process` directly.
fn precheck_signature(block: &Block) -> bool {
    let Some(account) = block.account_field() else {
        return true;
    };
    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(account.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(block.signature().as_bytes());
    verifying_key.verify(block.hash().as_bytes(), &sig).is_ok()
}

fn source_hash(block: &Block) -> Option<BlockHash> {
    match block {
        Block::Receive { source, .. } | Block::Open { source, .. } => Some(*source),
        Block::State { link, .. } => Some(BlockHash(*link)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::store::MemoryLedgerStore;
    use crate::types::{Account, Hash as H, Signature};
    use ed25519_dalek::{SigningKey, Signer};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, Account) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let account = Account(H(signing_key.verifying_key().to_bytes()));
        (signing_key, account)
    }

    fn sign(key: &SigningKey, hash: BlockHash) -> Signature {
        Signature(key.sign(hash.as_bytes()).to_bytes())
    }

    fn find_work(ledger: &Ledger<MemoryLedgerStore>, hash: BlockHash) -> u64 {
        for work in 0u64..1_000_000 {
            if Ledger::<MemoryLedgerStore>::work_difficulty(hash, work) >= ledger.work_threshold() {
                return work;
            }
        }
        panic!("no work value found under the test threshold");
    }

    fn processor() -> (Arc<Ledger<MemoryLedgerStore>>, BlockProcessor<MemoryLedgerStore>) {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default()));
        let processor = BlockProcessor::new(ledger.clone(), BlockProcessorConfig::default());
        (ledger, processor)
    }

    #[test]
    fn gap_source_quarantines_and_replays_on_resolution() {
        let (ledger, processor) = processor();
        let (genesis_key, genesis) = keypair();
        let (dest_key, dest) = keypair();

        let mut genesis_open = Block::State {
            account: genesis,
            previous: BlockHash::ZERO,
            representative: genesis,
            balance: 1_000_000,
            link: H::ZERO,
            signature: Signature::default(),
            work: 0,
        };
        let h = genesis_open.hash();
        genesis_open.set_signature(sign(&genesis_key, h));
        genesis_open.set_work(find_work(&ledger, h));
        assert!(processor.add(genesis_open, AddOrigin::Local));
        let results = processor.drain_batch();
        assert!(results[0].code.is_progress());

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

        // Submit the opener before its source send exists: it quarantines.
        assert!(processor.add(open, AddOrigin::Live));
        let results = processor.drain_batch();
        assert_eq!(results[0].code, ProcessCode::GapSource);
        assert_eq!(ledger.store().unchecked(&send_hash.0).len(), 1);

        // Now submit the send; its progress should replay the opener.
        assert!(processor.add(send, AddOrigin::Live));
        let results = processor.drain_batch();
        assert!(results[0].code.is_progress());
        let results = processor.drain_batch();
        assert!(results[0].code.is_progress(), "{:?}", results[0].code);
        assert!(ledger.store().unchecked(&send_hash.0).is_empty());
    }

    #[test]
    fn full_queue_rejects_admission() {
        let (ledger, processor) = processor();
        let (key, account) = keypair();
        let mut config = BlockProcessorConfig::default();
        config.full_queue_size = 1;
        let processor = BlockProcessor::new(ledger.clone(), config);
        let mut block = Block::State {
            account,
            previous: BlockHash::ZERO,
            representative: account,
            balance: 1,
            link: H::ZERO,
            signature: Signature::default(),
            work: 0,
        };
        let h = block.hash();
        block.set_signature(sign(&key, h));
        assert!(processor.add(block.clone(), AddOrigin::Live));
        assert!(!processor.add(block, AddOrigin::Live));
    }
}
