//! RocksDB-backed ledger store: one column family per table.
//!
//! A column-family-per-table wrapper (`RocksDbConfig`/`StorageError` shape,
//! `tempfile`-backed unit tests) over the ledger's full table set instead
//! of a single `blocks` + `meta` pair.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ::rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockDetails, BlockType, Sideband};
use crate::error::StorageError;
use crate::store::{AccountInfo, ConfirmationHeightInfo, LedgerStore, PendingInfo, PendingKey, StoreOp, WriteBatch};
use crate::types::{Account, Amount, BlockHash, Hash};
use crate::vote::Vote;

const CF_ACCOUNTS: &str = "accounts";
const CF_BLOCKS: &str = "blocks";
const CF_PENDING: &str = "pending";
const CF_CONFIRMATION_HEIGHT: &str = "confirmation_height";
const CF_FRONTIERS: &str = "frontiers";
const CF_UNCHECKED: &str = "unchecked";
const CF_REP_WEIGHT: &str = "rep_weight";
const CF_VOTE: &str = "vote";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[
    CF_ACCOUNTS,
    CF_BLOCKS,
    CF_PENDING,
    CF_CONFIRMATION_HEIGHT,
    CF_FRONTIERS,
    CF_UNCHECKED,
    CF_REP_WEIGHT,
    CF_VOTE,
    CF_META,
];

const META_ONLINE_WEIGHT_KEY: &[u8] = b"online_weight";
const META_VERSION_KEY: &[u8] = b"version";

#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    pub path: String,
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        RocksDbConfig { path: "./data/ledger".to_string(), create_if_missing: true }
    }
}

pub struct RocksDbLedgerStore {
    db: DB,
}

impl RocksDbLedgerStore {
    pub fn open(config: &RocksDbConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.create_missing_column_families(true);
        let cfs = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, &config.path, cfs)?;
        Ok(RocksDbLedgerStore { db })
    }

    fn cf(&self, name: &'static str) -> Result<&::rocksdb::ColumnFamily, StorageError> {
        self.db.cf_handle(name).ok_or(StorageError::MissingColumnFamily(name))
    }

    fn encode_block_row(block: &Block, sideband: &Sideband) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.push(block.block_type().tag());
        let body = block.encode();
        out.write_u32::<BigEndian>(body.len() as u32).expect("vec write cannot fail");
        out.extend_from_slice(&body);
        out.extend_from_slice(&encode_sideband_storage(sideband));
        out
    }

    fn decode_block_row(bytes: &[u8]) -> Result<(Block, Sideband), StorageError> {
        let mut cur = std::io::Cursor::new(bytes);
        let tag = cur.read_u8().map_err(|_| StorageError::CorruptedMeta("block row"))?;
        let block_type = BlockType::from_tag(tag)?;
        let body_len = cur.read_u32::<BigEndian>().map_err(|_| StorageError::CorruptedMeta("block row"))? as usize;
        let pos = cur.position() as usize;
        let body = &bytes[pos..pos + body_len];
        let block = Block::decode(block_type, body)?;
        let rest = &bytes[pos + body_len..];
        let sideband = decode_sideband_storage(rest)?;
        Ok((block, sideband))
    }
}

/// Fixed-field sideband representation used only for on-disk storage: every
/// field is always present, unlike the space-optimized wire form in
/// [`crate::block::Sideband::encode`], since the storage layer has no
/// per-message size budget to respect.
fn encode_sideband_storage(sb: &Sideband) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 32 + 16 + 8 + 8 + 1);
    buf.extend_from_slice(sb.successor.as_bytes());
    buf.extend_from_slice(sb.account.as_bytes());
    buf.extend_from_slice(&sb.balance.to_be_bytes());
    buf.write_u64::<BigEndian>(sb.height).expect("vec write cannot fail");
    buf.write_u64::<BigEndian>(sb.timestamp).expect("vec write cannot fail");
    buf.push(sb.details.to_byte());
    buf
}

fn decode_sideband_storage(bytes: &[u8]) -> Result<Sideband, StorageError> {
    if bytes.len() != 32 + 32 + 16 + 8 + 8 + 1 {
        return Err(StorageError::CorruptedMeta("sideband row"));
    }
    let mut cur = std::io::Cursor::new(bytes);
    let mut successor = [0u8; 32];
    std::io::Read::read_exact(&mut cur, &mut successor).map_err(|_| StorageError::CorruptedMeta("sideband row"))?;
    let mut account = [0u8; 32];
    std::io::Read::read_exact(&mut cur, &mut account).map_err(|_| StorageError::CorruptedMeta("sideband row"))?;
    let balance = cur.read_u128::<BigEndian>().map_err(|_| StorageError::CorruptedMeta("sideband row"))?;
    let height = cur.read_u64::<BigEndian>().map_err(|_| StorageError::CorruptedMeta("sideband row"))?;
    let timestamp = cur.read_u64::<BigEndian>().map_err(|_| StorageError::CorruptedMeta("sideband row"))?;
    let details_byte = cur.read_u8().map_err(|_| StorageError::CorruptedMeta("sideband row"))?;
    let details = BlockDetails::from_byte(details_byte).map_err(|_| StorageError::CorruptedMeta("sideband details"))?;
    Ok(Sideband {
        successor: BlockHash(Hash(successor)),
        account: Account(Hash(account)),
        balance,
        height,
        timestamp,
        details,
    })
}

fn json_get<T: for<'de> Deserialize<'de>>(bytes: Option<Vec<u8>>) -> Option<T> {
    bytes.and_then(|b| serde_json::from_slice(&b).ok())
}

fn json_put<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("serialization of internal store value cannot fail")
}

impl LedgerStore for RocksDbLedgerStore {
    fn account_info(&self, account: &Account) -> Option<AccountInfo> {
        let cf = self.cf(CF_ACCOUNTS).ok()?;
        json_get(self.db.get_cf(cf, account.as_bytes()).ok()?)
    }

    fn block(&self, hash: &BlockHash) -> Option<(Block, Sideband)> {
        let cf = self.cf(CF_BLOCKS).ok()?;
        let bytes = self.db.get_cf(cf, hash.as_bytes()).ok()??;
        Self::decode_block_row(&bytes).ok()
    }

    fn pending(&self, key: &PendingKey) -> Option<PendingInfo> {
        let cf = self.cf(CF_PENDING).ok()?;
        json_get(self.db.get_cf(cf, pending_key_bytes(key)).ok()?)
    }

    fn confirmation_height(&self, account: &Account) -> Option<ConfirmationHeightInfo> {
        let cf = self.cf(CF_CONFIRMATION_HEIGHT).ok()?;
        json_get(self.db.get_cf(cf, account.as_bytes()).ok()?)
    }

    fn frontier_account(&self, hash: &BlockHash) -> Option<Account> {
        let cf = self.cf(CF_FRONTIERS).ok()?;
        let bytes = self.db.get_cf(cf, hash.as_bytes()).ok()??;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(Account(Hash(arr)))
    }

    fn unchecked(&self, dependency: &Hash) -> Vec<Block> {
        let Ok(cf) = self.cf(CF_UNCHECKED) else { return Vec::new() };
        match self.db.get_cf(cf, dependency.as_bytes()) {
            Ok(Some(bytes)) => json_get::<Vec<(u8, Vec<u8>)>>(Some(bytes))
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(tag, body)| BlockType::from_tag(tag).ok().and_then(|bt| Block::decode(bt, &body).ok()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn has_any_pending(&self, account: &Account) -> bool {
        let Ok(cf) = self.cf(CF_PENDING) else { return false };
        let mode = ::rocksdb::IteratorMode::From(account.as_bytes(), ::rocksdb::Direction::Forward);
        self.db
            .iterator_cf(cf, mode)
            .filter_map(Result::ok)
            .next()
            .map(|(key, _)| key.starts_with(account.as_bytes()))
            .unwrap_or(false)
    }

    fn rep_weight(&self, representative: &Account) -> Amount {
        let Ok(cf) = self.cf(CF_REP_WEIGHT) else { return 0 };
        match self.db.get_cf(cf, representative.as_bytes()) {
            Ok(Some(bytes)) if bytes.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                u128::from_be_bytes(arr)
            }
            _ => 0,
        }
    }

    fn online_weight(&self) -> Amount {
        let Ok(cf) = self.cf(CF_META) else { return 0 };
        match self.db.get_cf(cf, META_ONLINE_WEIGHT_KEY) {
            Ok(Some(bytes)) if bytes.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                u128::from_be_bytes(arr)
            }
            _ => 0,
        }
    }

    fn latest_vote(&self, account: &Account) -> Option<Vote> {
        let cf = self.cf(CF_VOTE).ok()?;
        let bytes = self.db.get_cf(cf, account.as_bytes()).ok()??;
        json_get(Some(bytes))
    }

    fn meta_version(&self) -> u32 {
        let Ok(cf) = self.cf(CF_META) else { return super::CURRENT_META_VERSION };
        match self.db.get_cf(cf, META_VERSION_KEY) {
            Ok(Some(bytes)) if bytes.len() == 4 => {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(&bytes);
                u32::from_be_bytes(arr)
            }
            _ => super::CURRENT_META_VERSION,
        }
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut rocks_batch = ::rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                StoreOp::PutAccountInfo(account, info) => {
                    rocks_batch.put_cf(self.cf(CF_ACCOUNTS)?, account.as_bytes(), json_put(&info));
                }
                StoreOp::DeleteAccountInfo(account) => {
                    rocks_batch.delete_cf(self.cf(CF_ACCOUNTS)?, account.as_bytes());
                }
                StoreOp::PutBlock(hash, block, sideband) => {
                    rocks_batch.put_cf(self.cf(CF_BLOCKS)?, hash.as_bytes(), Self::encode_block_row(&block, &sideband));
                }
                StoreOp::DeleteBlock(hash) => {
                    rocks_batch.delete_cf(self.cf(CF_BLOCKS)?, hash.as_bytes());
                }
                StoreOp::SetSuccessor(hash, successor) => {
                    let cf = self.cf(CF_BLOCKS)?;
                    if let Some(bytes) = self.db.get_cf(cf, hash.as_bytes())? {
                        let (block, mut sideband) = Self::decode_block_row(&bytes)?;
                        sideband.successor = successor;
                        rocks_batch.put_cf(cf, hash.as_bytes(), Self::encode_block_row(&block, &sideband));
                    }
                }
                StoreOp::PutPending(key, info) => {
                    rocks_batch.put_cf(self.cf(CF_PENDING)?, pending_key_bytes(&key), json_put(&info));
                }
                StoreOp::DeletePending(key) => {
                    rocks_batch.delete_cf(self.cf(CF_PENDING)?, pending_key_bytes(&key));
                }
                StoreOp::PutUnchecked(dependency, block) => {
                    let cf = self.cf(CF_UNCHECKED)?;
                    let mut existing: Vec<(u8, Vec<u8>)> =
                        json_get(self.db.get_cf(cf, dependency.as_bytes())?).unwrap_or_default();
                    existing.push((block.block_type().tag(), block.encode()));
                    rocks_batch.put_cf(cf, dependency.as_bytes(), json_put(&existing));
                }
                StoreOp::DeleteUnchecked(dependency, block_hash) => {
                    let cf = self.cf(CF_UNCHECKED)?;
                    let existing: Vec<(u8, Vec<u8>)> =
                        json_get(self.db.get_cf(cf, dependency.as_bytes())?).unwrap_or_default();
                    let remaining: Vec<(u8, Vec<u8>)> = existing
                        .into_iter()
                        .filter(|(tag, body)| {
                            BlockType::from_tag(*tag)
                                .ok()
                                .and_then(|bt| Block::decode(bt, body).ok())
                                .map(|b| b.hash() != block_hash)
                                .unwrap_or(false)
                        })
                        .collect();
                    if remaining.is_empty() {
                        rocks_batch.delete_cf(cf, dependency.as_bytes());
                    } else {
                        rocks_batch.put_cf(cf, dependency.as_bytes(), json_put(&remaining));
                    }
                }
                StoreOp::PutConfirmationHeight(account, info) => {
                    rocks_batch.put_cf(self.cf(CF_CONFIRMATION_HEIGHT)?, account.as_bytes(), json_put(&info));
                }
                StoreOp::PutFrontier(hash, account) => {
                    rocks_batch.put_cf(self.cf(CF_FRONTIERS)?, hash.as_bytes(), account.as_bytes());
                }
                StoreOp::DeleteFrontier(hash) => {
                    rocks_batch.delete_cf(self.cf(CF_FRONTIERS)?, hash.as_bytes());
                }
                StoreOp::AdjustRepWeight(representative, delta) => {
                    let current = self.rep_weight(&representative) as i128;
                    let updated = (current + delta).max(0) as u128;
                    rocks_batch.put_cf(self.cf(CF_REP_WEIGHT)?, representative.as_bytes(), updated.to_be_bytes());
                }
                StoreOp::PutVote(account, vote) => {
                    rocks_batch.put_cf(self.cf(CF_VOTE)?, account.as_bytes(), json_put(&vote_json(&vote)));
                }
                StoreOp::SetOnlineWeight(weight) => {
                    rocks_batch.put_cf(self.cf(CF_META)?, META_ONLINE_WEIGHT_KEY, weight.to_be_bytes());
                }
            }
        }
        self.db.write(rocks_batch)?;
        Ok(())
    }
}

fn pending_key_bytes(key: &PendingKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(key.destination.as_bytes());
    buf.extend_from_slice(key.send_hash.as_bytes());
    buf
}

/// `Vote` has no derived `Serialize`: its payload may embed a full `Block`,
/// which uses the canonical hex/base-32 JSON form rather than a derive.
/// This wraps a vote into that same shape for storage of the single
/// latest-known vote per account.
#[derive(Serialize, Deserialize)]
struct VoteJson {
    account: String,
    signature: String,
    sequence: u64,
    hashes: Vec<String>,
}

fn vote_json(vote: &Vote) -> VoteJson {
    VoteJson {
        account: vote.account.to_address(),
        signature: vote.signature.to_hex(),
        sequence: vote.sequence,
        hashes: vote.payload.block_hashes().iter().map(|h| h.0.to_hex()).collect(),
    }
}

impl<'de> Deserialize<'de> for Vote {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = VoteJson::deserialize(deserializer)?;
        let account = Account::from_address(&json.account).ok_or_else(|| serde::de::Error::custom("bad account"))?;
        let signature = crate::types::Signature::from_hex(&json.signature)
            .ok_or_else(|| serde::de::Error::custom("bad signature"))?;
        let hashes = json
            .hashes
            .iter()
            .map(|h| crate::types::Hash::from_hex(h).map(BlockHash).ok_or_else(|| serde::de::Error::custom("bad hash")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Vote {
            account,
            signature,
            sequence: json.sequence,
            payload: crate::vote::VotePayload::Hashes(hashes),
        })
    }
}

impl Serialize for Vote {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        vote_json(self).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Epoch, Hash as H, Signature};

    #[test]
    fn open_and_roundtrip_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RocksDbConfig { path: dir.path().to_string_lossy().to_string(), create_if_missing: true };
        let store = RocksDbLedgerStore::open(&config).expect("open store");

        let block = Block::Send {
            previous: BlockHash::ZERO,
            destination: Account(H::digest(b"dest")),
            balance: 500,
            signature: Signature([9u8; 64]),
            work: 42,
        };
        let hash = block.hash();
        let sideband = Sideband {
            successor: BlockHash::ZERO,
            account: Account(H::digest(b"acct")),
            balance: 500,
            height: 1,
            timestamp: 1000,
            details: BlockDetails { epoch: Epoch::Epoch0, is_send: true, is_receive: false, is_epoch: false },
        };
        let mut batch = WriteBatch::new();
        batch.push(StoreOp::PutBlock(hash, block.clone(), sideband));
        store.commit(batch).expect("commit");

        let (decoded, decoded_sideband) = store.block(&hash).expect("block present");
        assert_eq!(decoded, block);
        assert_eq!(decoded_sideband.balance, 500);
    }

    #[test]
    fn rep_weight_persists_across_adjustments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RocksDbConfig { path: dir.path().to_string_lossy().to_string(), create_if_missing: true };
        let store = RocksDbLedgerStore::open(&config).expect("open store");
        let rep = Account(H::digest(b"rep"));

        let mut batch = WriteBatch::new();
        batch.push(StoreOp::AdjustRepWeight(rep, 1_000));
        store.commit(batch).expect("commit");
        let mut batch = WriteBatch::new();
        batch.push(StoreOp::AdjustRepWeight(rep, -200));
        store.commit(batch).expect("commit");

        assert_eq!(store.rep_weight(&rep), 800);
    }
}
