//! End-to-end scenarios driving the ledger, active engine, block
//! processor, vote generator, and request aggregator together through
//! the crate's public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use chain::active::ActiveTransactions;
use chain::block::Block;
use chain::block_processor::{AddOrigin, BlockProcessor};
use chain::config::{ActiveConfig, BlockProcessorConfig, LedgerConfig, RequestAggregatorConfig, VoteGeneratorConfig};
use chain::error::ProcessCode;
use chain::ledger::{Ledger, RollbackError};
use chain::request_aggregator::{Channel, RequestAggregator, RequestOutcome};
use chain::store::{ConfirmationHeightInfo, LedgerStore, MemoryLedgerStore, PendingKey, StoreOp, WriteBatch};
use chain::types::{Account, BlockHash, Epoch, Hash, QualifiedRoot, Root, Signature};
use chain::vote::{Vote, VotePayload};
use chain::vote_cache::RecentVoteCache;
use chain::vote_generator::{LocalRepresentative, VoteGenerator, VoteSink};

fn keypair() -> (SigningKey, Account) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let account = Account(Hash(signing_key.verifying_key().to_bytes()));
    (signing_key, account)
}

fn sign(key: &SigningKey, hash: BlockHash) -> Signature {
    Signature(key.sign(hash.as_bytes()).to_bytes())
}

/// A `LedgerConfig` with the work-difficulty floor disabled, so tests can
/// build blocks without brute-forcing a qualifying work value.
fn test_config() -> LedgerConfig {
    LedgerConfig { work_threshold: 0, ..LedgerConfig::default() }
}

fn open_block(key: &SigningKey, account: Account, balance: u128) -> Block {
    let mut block = Block::State {
        account,
        previous: BlockHash::ZERO,
        representative: account,
        balance,
        link: Hash::ZERO,
        signature: Signature::default(),
        work: 0,
    };
    let h = block.hash();
    block.set_signature(sign(key, h));
    block
}

fn send_block(key: &SigningKey, account: Account, previous: BlockHash, new_balance: u128, destination: Account) -> Block {
    let mut block = Block::State {
        account,
        previous,
        representative: account,
        balance: new_balance,
        link: destination.0,
        signature: Signature::default(),
        work: 0,
    };
    let h = block.hash();
    block.set_signature(sign(key, h));
    block
}

fn receive_block(key: &SigningKey, account: Account, previous: BlockHash, new_balance: u128, representative: Account, source: BlockHash) -> Block {
    let mut block = Block::State {
        account,
        previous,
        representative,
        balance: new_balance,
        link: source.0,
        signature: Signature::default(),
        work: 0,
    };
    let h = block.hash();
    block.set_signature(sign(key, h));
    block
}

fn change_block(key: &SigningKey, account: Account, previous: BlockHash, balance: u128, representative: Account) -> Block {
    let mut block = Block::State {
        account,
        previous,
        representative,
        balance,
        link: Hash::ZERO,
        signature: Signature::default(),
        work: 0,
    };
    let h = block.hash();
    block.set_signature(sign(key, h));
    block
}

// S1 — send/receive round trip. -----------------------------------------

#[test]
fn s1_send_then_open_round_trip() {
    let ledger = Ledger::new(Arc::new(MemoryLedgerStore::new()), test_config());
    let (genesis_key, genesis) = keypair();
    let (dest_key, dest) = keypair();

    let open = open_block(&genesis_key, genesis, 2_000_000);
    let open_hash = open.hash();
    assert!(ledger.process(&open).code.is_progress());

    let send = send_block(&genesis_key, genesis, open_hash, 1_000_000, dest);
    let send_hash = send.hash();
    assert!(ledger.process(&send).code.is_progress());
    assert_eq!(ledger.store().rep_weight(&genesis), 1_000_000);

    let pending_key = PendingKey { destination: dest, send_hash };
    let pending = ledger.store().pending(&pending_key).expect("send must leave a pending entry");
    assert_eq!(pending.source_account, genesis);
    assert_eq!(pending.amount, 1_000_000);
    assert_eq!(pending.epoch, Epoch::Epoch0);

    let dest_open = receive_block(&dest_key, dest, BlockHash::ZERO, 1_000_000, dest, send_hash);
    assert!(ledger.process(&dest_open).code.is_progress());
    assert!(ledger.store().pending(&pending_key).is_none());
    assert_eq!(ledger.store().rep_weight(&dest), 1_000_000);
}

// S2 — fork resolution. --------------------------------------------------

#[test]
fn s2_majority_vote_confirms_one_of_two_competing_sends() {
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), test_config()));
    let (genesis_key, genesis) = keypair();
    let (_k1_key, k1) = keypair();
    let (_k2_key, k2) = keypair();

    let open = open_block(&genesis_key, genesis, 1_000);
    let open_hash = open.hash();
    assert!(ledger.process(&open).code.is_progress());

    let b1 = send_block(&genesis_key, genesis, open_hash, 900, k1);
    let b1_prime = send_block(&genesis_key, genesis, open_hash, 900, k2);
    assert_ne!(b1.hash(), b1_prime.hash());

    let active = ActiveTransactions::new(ledger.clone(), ActiveConfig::default());
    assert!(active.insert(b1.clone(), 0).inserted);
    assert!(!active.insert(b1_prime.clone(), 0).inserted);
    assert_eq!(active.active_count(), 1);

    let rep = Account(Hash::digest(b"s2-rep"));
    ledger
        .store()
        .commit({
            let mut batch = WriteBatch::new();
            // 70% of online weight: comfortably over the default 67%
            // quorum fraction, matching the scenario's "clear majority"
            // intent without depending on the exact default threshold.
            batch.push(StoreOp::AdjustRepWeight(rep, 700));
            batch.push(StoreOp::SetOnlineWeight(1_000));
            batch
        })
        .unwrap();

    let vote = Vote {
        account: rep,
        signature: Signature::default(),
        sequence: 1,
        payload: VotePayload::hashes(vec![b1_prime.hash()]).unwrap(),
    };
    active.process_vote(&vote);

    let qualified_root = QualifiedRoot { previous: open_hash, root: Root(open_hash.0) };
    assert!(active.is_confirmed(&qualified_root));
    assert_eq!(active.winner_of(&qualified_root), Some(b1_prime.hash()));
    assert_eq!(active.active_count(), 0, "confirmed root is no longer active");

    // The confirmed winner is the one actually committed to the ledger;
    // the loser never touches it.
    assert!(ledger.process(&b1_prime).code.is_progress());
    assert!(ledger.store().pending(&PendingKey { destination: k1, send_hash: b1.hash() }).is_none());
    let pending_k2 = ledger
        .store()
        .pending(&PendingKey { destination: k2, send_hash: b1_prime.hash() })
        .expect("confirmed send must leave a pending entry for k2");
    assert_eq!(pending_k2.amount, 100);
}

// S3 — gap-source. --------------------------------------------------------

#[test]
fn s3_gap_source_quarantines_then_replays_on_resolution() {
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), test_config()));
    let processor = BlockProcessor::new(ledger.clone(), BlockProcessorConfig::default());
    let (genesis_key, genesis) = keypair();
    let (dest_key, dest) = keypair();

    let genesis_open = open_block(&genesis_key, genesis, 1_000_000);
    let genesis_open_hash = genesis_open.hash();
    assert!(processor.add(genesis_open, AddOrigin::Local));
    assert!(processor.drain_batch()[0].code.is_progress());

    let send = send_block(&genesis_key, genesis, genesis_open_hash, 900_000, dest);
    let send_hash = send.hash();
    let open = receive_block(&dest_key, dest, BlockHash::ZERO, 100_000, dest, send_hash);

    // The opener arrives before its source: it quarantines.
    assert!(processor.add(open, AddOrigin::Live));
    let results = processor.drain_batch();
    assert_eq!(results[0].code, ProcessCode::GapSource);
    assert_eq!(ledger.store().unchecked(&send_hash.0).len(), 1);

    // The send arrives, commits, and replays the quarantined opener.
    assert!(processor.add(send, AddOrigin::Live));
    assert!(processor.drain_batch()[0].code.is_progress());
    assert!(processor.drain_batch()[0].code.is_progress());
    assert!(ledger.store().unchecked(&send_hash.0).is_empty());
    assert_eq!(ledger.store().account_info(&dest).unwrap().balance, 100_000);
    assert!(ledger.store().pending(&PendingKey { destination: dest, send_hash }).is_none());
}

// S4 — epoch upgrade. ------------------------------------------------------

#[test]
fn s4_epoch_upgrade_then_legacy_block_is_rejected() {
    let (genesis_key, genesis) = keypair();
    let (epoch_signer_key, epoch_signer) = keypair();
    let config = LedgerConfig { epoch_v1_signer: epoch_signer, work_threshold: 0, ..LedgerConfig::default() };
    let epoch_v1_link = config.epoch_v1_link;
    let ledger = Ledger::new(Arc::new(MemoryLedgerStore::new()), config);

    let open = open_block(&genesis_key, genesis, 1_000_000);
    let open_hash = open.hash();
    assert!(ledger.process(&open).code.is_progress());
    assert_eq!(ledger.store().account_info(&genesis).unwrap().epoch, Epoch::Epoch0);

    let mut epoch_block = Block::State {
        account: genesis,
        previous: open_hash,
        representative: genesis,
        balance: 1_000_000,
        link: epoch_v1_link,
        signature: Signature::default(),
        work: 0,
    };
    let epoch_hash = epoch_block.hash();
    epoch_block.set_signature(sign(&epoch_signer_key, epoch_hash));
    let result = ledger.process(&epoch_block);
    assert!(result.code.is_progress(), "{:?}", result.code);
    assert_eq!(ledger.store().account_info(&genesis).unwrap().epoch, Epoch::Epoch1);

    // A legacy (non-state) block format cannot extend a chain that has
    // moved past epoch_0.
    let mut legacy_change = Block::Change {
        previous: epoch_hash,
        representative: genesis,
        signature: Signature::default(),
        work: 0,
    };
    let h = legacy_change.hash();
    legacy_change.set_signature(sign(&genesis_key, h));
    assert_eq!(ledger.process(&legacy_change).code, ProcessCode::BlockPosition);
}

// S5 — rollback limit. -----------------------------------------------------

#[test]
fn s5_rollback_rejected_below_confirmation_height() {
    let ledger = Ledger::new(Arc::new(MemoryLedgerStore::new()), test_config());
    let (key, account) = keypair();
    let (r2, _) = keypair();
    let (r3, _) = keypair();
    let (r4, _) = keypair();
    let (r5, _) = keypair();

    let b1 = open_block(&key, account, 1_000_000); // height 1
    let b1_hash = b1.hash();
    assert!(ledger.process(&b1).code.is_progress());

    let b2 = change_block(&key, account, b1_hash, 1_000_000, Account(Hash(r2.verifying_key().to_bytes())));
    let b2_hash = b2.hash();
    assert!(ledger.process(&b2).code.is_progress());

    let b3 = change_block(&key, account, b2_hash, 1_000_000, Account(Hash(r3.verifying_key().to_bytes())));
    let b3_hash = b3.hash();
    assert!(ledger.process(&b3).code.is_progress());

    let b4 = change_block(&key, account, b3_hash, 1_000_000, Account(Hash(r4.verifying_key().to_bytes())));
    let b4_hash = b4.hash();
    assert!(ledger.process(&b4).code.is_progress());

    let b5 = change_block(&key, account, b4_hash, 1_000_000, Account(Hash(r5.verifying_key().to_bytes())));
    let b5_hash = b5.hash();
    assert!(ledger.process(&b5).code.is_progress());

    ledger
        .store()
        .commit({
            let mut batch = WriteBatch::new();
            batch.push(StoreOp::PutConfirmationHeight(account, ConfirmationHeightInfo { height: 3, frontier_hash: b3_hash }));
            batch
        })
        .unwrap();

    let err = ledger.rollback(b2_hash).expect_err("rollback below confirmation height must be rejected");
    match err {
        RollbackError::BelowConfirmationHeight { account: a, height, confirmation_height } => {
            assert_eq!(a, account);
            assert_eq!(height, 2);
            assert_eq!(confirmation_height, 3);
        }
        other => panic!("unexpected rollback error: {other:?}"),
    }

    assert_eq!(ledger.store().account_info(&account).unwrap().head, b5_hash);
}

// S6 — vote aggregator cache hit. ------------------------------------------

#[derive(Default)]
struct RecordingChannel {
    sent: StdMutex<Vec<Vote>>,
}

impl Channel for RecordingChannel {
    fn send_votes(&self, votes: Vec<Vote>) {
        self.sent.lock().unwrap().extend(votes);
    }
}

struct CountingSink {
    floods: AtomicUsize,
}

impl VoteSink for CountingSink {
    fn flood(&self, _vote: Vote, _fanout: usize) {
        self.floods.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn s6_second_request_is_served_from_cache() {
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new()), test_config()));
    let (key1, account1) = keypair();
    let (key2, account2) = keypair();
    let open1 = open_block(&key1, account1, 10);
    let h1 = open1.hash();
    assert!(ledger.process(&open1).code.is_progress());
    let open2 = open_block(&key2, account2, 10);
    let h2 = open2.hash();
    assert!(ledger.process(&open2).code.is_progress());

    let (rep_key, rep_account) = keypair();
    let vote_cache = Arc::new(RecentVoteCache::new(1024, 1));
    let vote_generator = Arc::new(VoteGenerator::new(
        ledger.clone(),
        VoteGeneratorConfig::default(),
        vec![LocalRepresentative { account: rep_account, signing_key: rep_key }],
    ));
    let sink = Arc::new(CountingSink { floods: AtomicUsize::new(0) });
    vote_generator.set_sink(sink.clone());
    let aggregator = RequestAggregator::new(ledger.clone(), vote_cache.clone(), vote_generator.clone(), RequestAggregatorConfig::default());

    let channel = Arc::new(RecordingChannel::default());
    let root1 = Root(h1.0);
    let root2 = Root(h2.0);

    assert!(aggregator.request("peer-1", channel.clone(), h1, root1));
    assert!(aggregator.request("peer-1", channel.clone(), h2, root2));
    let first_round = aggregator.process_endpoint("peer-1");
    assert_eq!(first_round, vec![RequestOutcome::QueuedToGenerator, RequestOutcome::QueuedToGenerator]);

    let votes = vote_generator.flush();
    assert_eq!(votes.len(), 1, "one local representative produces one vote covering both hashes");
    assert_eq!(votes[0].sequence, 1);
    assert_eq!(votes[0].payload.block_hashes().len(), 2);
    assert_eq!(sink.floods.load(Ordering::SeqCst), 1);
    vote_cache.insert(votes[0].clone());

    assert!(aggregator.request("peer-1", channel.clone(), h1, root1));
    assert!(aggregator.request("peer-1", channel.clone(), h2, root2));
    let second_round = aggregator.process_endpoint("peer-1");
    assert_eq!(second_round, vec![RequestOutcome::CachedVotes, RequestOutcome::CachedVotes]);
    assert_eq!(aggregator.metrics.requests_cached_votes.load(Ordering::Relaxed), 2);
    assert_eq!(aggregator.metrics.requests_generated.load(Ordering::Relaxed), 2);

    // No new hash was handed to the generator, so no new sequence is
    // consumed: flushing again produces nothing.
    assert!(vote_generator.flush().is_empty());
    assert_eq!(channel.sent.lock().unwrap().len(), 2);
}
