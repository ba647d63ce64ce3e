//! Error and result types shared across the ledger core.
//!
//! Validation outcomes are modeled as a plain classification enum
//! ([`ProcessCode`]) rather than an error type, per the block-level /
//! consistency / transient split the ledger draws between "this block was
//! rejected" (not an error) and "an invariant was violated" (a bug).

use thiserror::Error;

/// Classification code returned by [`crate::ledger::Ledger::process`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProcessCode {
    Progress,
    Old,
    GapPrevious,
    GapSource,
    BadSignature,
    NegativeSpend,
    Fork,
    Unreceivable,
    OpenedBurnAccount,
    BalanceMismatch,
    RepresentativeMismatch,
    BlockPosition,
    InsufficientWork,
}

impl ProcessCode {
    pub fn is_progress(self) -> bool {
        matches!(self, ProcessCode::Progress)
    }

    /// True for codes that mean "try again once the dependency shows up",
    /// as opposed to a permanent rejection.
    pub fn is_gap(self) -> bool {
        matches!(self, ProcessCode::GapPrevious | ProcessCode::GapSource)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessCode::Progress => "progress",
            ProcessCode::Old => "old",
            ProcessCode::GapPrevious => "gap_previous",
            ProcessCode::GapSource => "gap_source",
            ProcessCode::BadSignature => "bad_signature",
            ProcessCode::NegativeSpend => "negative_spend",
            ProcessCode::Fork => "fork",
            ProcessCode::Unreceivable => "unreceivable",
            ProcessCode::OpenedBurnAccount => "opened_burn_account",
            ProcessCode::BalanceMismatch => "balance_mismatch",
            ProcessCode::RepresentativeMismatch => "representative_mismatch",
            ProcessCode::BlockPosition => "block_position",
            ProcessCode::InsufficientWork => "insufficient_work",
        }
    }
}

/// Invariant violations. These are bugs, not expected outcomes; the block
/// processor and ledger surface them so a caller can choose to panic
/// (matching spec's "consistency errors: fatal" classification) instead of
/// silently continuing with corrupted state.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("representative weight cache mismatch for {representative}: cached {cached}, recomputed {recomputed}")]
    RepWeightMismatch {
        representative: String,
        cached: u128,
        recomputed: u128,
    },
    #[error("missing pending entry for committed send {hash}")]
    MissingPendingEntry { hash: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage-layer failures, covering the full table set the ledger store
/// persists.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),
    #[error("corrupted meta entry: {0}")]
    CorruptedMeta(&'static str),
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),
}

/// Codec failures for the block/sideband binary format.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CodecError {
    #[error("buffer too short: need at least {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unknown block type tag: {0}")]
    UnknownBlockType(u8),
    #[error("trailing bytes after decoding")]
    TrailingBytes,
    #[error("malformed state block link")]
    MalformedStateLink,
    #[error("invalid account address")]
    InvalidAddress,
}

/// Wire-message framing failures.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum MessageError {
    #[error("bad magic bytes")]
    BadMagic,
    #[error("version_using {using} below configured minimum {min}")]
    VersionTooOld { using: u8, min: u8 },
    #[error("unknown message type tag: {0}")]
    UnknownMessageType(u8),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("too many confirm_req pairs: {0} (max 7)")]
    TooManyConfirmReqPairs(usize),
    #[error("too many vote hashes: {0} (max 12)")]
    TooManyVoteHashes(usize),
}
