//! Block variants, their canonical wire encoding, and the sideband
//! metadata attached to a block once it is committed to the ledger.
//!
//! The canonical encoding below is hand-rolled per-field big-endian
//! writes rather than a generic derive-based form, since the wire layout
//! is a normative, versioned format rather than an implementation
//! detail left to a serializer.

use std::convert::TryFrom;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::types::{Account, Amount, BlockHash, Epoch, Hash, Signature};

/// Discriminant byte for a block's on-wire/hash-preamble type tag.
/// Numbering follows the reference node's `block_type` enum (0/1 reserved
/// for invalid/not-a-block).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BlockType {
    Send = 2,
    Receive = 3,
    Open = 4,
    Change = 5,
    State = 6,
}

impl BlockType {
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            2 => Ok(BlockType::Send),
            3 => Ok(BlockType::Receive),
            4 => Ok(BlockType::Open),
            5 => Ok(BlockType::Change),
            6 => Ok(BlockType::State),
            other => Err(CodecError::UnknownBlockType(other)),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A block, tagged union of the five variants the ledger understands.
/// Each variant carries its hashable fields plus `signature` and `work`.
#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    Send {
        previous: BlockHash,
        destination: Account,
        balance: Amount,
        signature: Signature,
        work: u64,
    },
    Receive {
        previous: BlockHash,
        source: BlockHash,
        signature: Signature,
        work: u64,
    },
    Open {
        source: BlockHash,
        representative: Account,
        account: Account,
        signature: Signature,
        work: u64,
    },
    Change {
        previous: BlockHash,
        representative: Account,
        signature: Signature,
        work: u64,
    },
    State {
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Hash,
        signature: Signature,
        work: u64,
    },
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Send { .. } => BlockType::Send,
            Block::Receive { .. } => BlockType::Receive,
            Block::Open { .. } => BlockType::Open,
            Block::Change { .. } => BlockType::Change,
            Block::State { .. } => BlockType::State,
        }
    }

    /// The block's `previous` field, or the zero hash for an opening block
    /// (which has none).
    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Send { previous, .. }
            | Block::Receive { previous, .. }
            | Block::Change { previous, .. }
            | Block::State { previous, .. } => *previous,
            Block::Open { .. } => BlockHash::ZERO,
        }
    }

    /// The account field, when the block self-describes it (`Open` and
    /// `State`). Legacy send/receive/change blocks do not embed an
    /// account; callers must supply it from ledger context.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Block::Open { account, .. } | Block::State { account, .. } => Some(*account),
            _ => None,
        }
    }

    pub fn representative_field(&self) -> Option<Account> {
        match self {
            Block::Open { representative, .. }
            | Block::Change { representative, .. }
            | Block::State { representative, .. } => Some(*representative),
            _ => None,
        }
    }

    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Block::Send { balance, .. } | Block::State { balance, .. } => Some(*balance),
            _ => None,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Block::Send { signature, .. }
            | Block::Receive { signature, .. }
            | Block::Open { signature, .. }
            | Block::Change { signature, .. }
            | Block::State { signature, .. } => signature,
        }
    }

    pub fn set_signature(&mut self, sig: Signature) {
        match self {
            Block::Send { signature, .. }
            | Block::Receive { signature, .. }
            | Block::Open { signature, .. }
            | Block::Change { signature, .. }
            | Block::State { signature, .. } => *signature = sig,
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Block::Send { work, .. }
            | Block::Receive { work, .. }
            | Block::Open { work, .. }
            | Block::Change { work, .. }
            | Block::State { work, .. } => *work,
        }
    }

    pub fn set_work(&mut self, w: u64) {
        match self {
            Block::Send { work, .. }
            | Block::Receive { work, .. }
            | Block::Open { work, .. }
            | Block::Change { work, .. }
            | Block::State { work, .. } => *work = w,
        }
    }

    /// Hashable-field bytes only: no signature, no work.
    fn hashable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        match self {
            Block::Send {
                previous,
                destination,
                balance,
                ..
            } => {
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(destination.as_bytes());
                buf.extend_from_slice(&balance.to_be_bytes());
            }
            Block::Receive { previous, source, .. } => {
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(source.as_bytes());
            }
            Block::Open {
                source,
                representative,
                account,
                ..
            } => {
                buf.extend_from_slice(source.as_bytes());
                buf.extend_from_slice(representative.as_bytes());
                buf.extend_from_slice(account.as_bytes());
            }
            Block::Change {
                previous,
                representative,
                ..
            } => {
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(representative.as_bytes());
            }
            Block::State {
                account,
                previous,
                representative,
                balance,
                link,
                ..
            } => {
                buf.extend_from_slice(account.as_bytes());
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(representative.as_bytes());
                buf.extend_from_slice(&balance.to_be_bytes());
                buf.extend_from_slice(link.as_bytes());
            }
        }
        buf
    }

    /// BLAKE2b-256 over the hashable fields, prefixed for state blocks with
    /// a 32-byte preamble whose last byte is the block-type tag.
    pub fn hash(&self) -> BlockHash {
        let hashable = self.hashable_bytes();
        let h = match self {
            Block::State { .. } => {
                let mut preamble = [0u8; 32];
                preamble[31] = self.block_type().tag();
                Hash::digest_parts(&[&preamble, &hashable])
            }
            _ => Hash::digest_parts(&[&hashable]),
        };
        BlockHash(h)
    }

    /// Canonical wire encoding of the block body (no sideband).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160);
        match self {
            Block::Send {
                previous,
                destination,
                balance,
                signature,
                work,
            } => {
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(destination.as_bytes());
                buf.extend_from_slice(&balance.to_be_bytes());
                buf.extend_from_slice(signature.as_bytes());
                buf.write_u64::<BigEndian>(*work).expect("vec write cannot fail");
            }
            Block::Receive {
                previous,
                source,
                signature,
                work,
            } => {
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(source.as_bytes());
                buf.extend_from_slice(signature.as_bytes());
                buf.write_u64::<BigEndian>(*work).expect("vec write cannot fail");
            }
            Block::Open {
                source,
                representative,
                account,
                signature,
                work,
            } => {
                buf.extend_from_slice(source.as_bytes());
                buf.extend_from_slice(representative.as_bytes());
                buf.extend_from_slice(account.as_bytes());
                buf.extend_from_slice(signature.as_bytes());
                buf.write_u64::<BigEndian>(*work).expect("vec write cannot fail");
            }
            Block::Change {
                previous,
                representative,
                signature,
                work,
            } => {
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(representative.as_bytes());
                buf.extend_from_slice(signature.as_bytes());
                buf.write_u64::<BigEndian>(*work).expect("vec write cannot fail");
            }
            Block::State {
                account,
                previous,
                representative,
                balance,
                link,
                signature,
                work,
            } => {
                buf.extend_from_slice(account.as_bytes());
                buf.extend_from_slice(previous.as_bytes());
                buf.extend_from_slice(representative.as_bytes());
                buf.extend_from_slice(&balance.to_be_bytes());
                buf.extend_from_slice(link.as_bytes());
                buf.extend_from_slice(signature.as_bytes());
                // Big-endian on the wire; the reference node additionally
                // keeps this field byte-swapped in its in-memory struct,
                // a detail that has no bearing on a Rust `u64`.
                buf.write_u64::<BigEndian>(*work).expect("vec write cannot fail");
            }
        }
        buf
    }

    /// Decodes a block body of the given type from `bytes`, requiring the
    /// slice to contain exactly the body (no trailing sideband or garbage).
    pub fn decode(block_type: BlockType, bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cur = std::io::Cursor::new(bytes);
        let need = |n: usize| -> Result<(), CodecError> {
            if bytes.len() < n {
                Err(CodecError::Truncated { needed: n, have: bytes.len() })
            } else {
                Ok(())
            }
        };
        let block = match block_type {
            BlockType::Send => {
                need(32 + 32 + 16 + 64 + 8)?;
                let previous = read_block_hash(&mut cur)?;
                let destination = read_account(&mut cur)?;
                let balance = read_u128(&mut cur)?;
                let signature = read_signature(&mut cur)?;
                let work = cur.read_u64::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?;
                Block::Send { previous, destination, balance, signature, work }
            }
            BlockType::Receive => {
                need(32 + 32 + 64 + 8)?;
                let previous = read_block_hash(&mut cur)?;
                let source = read_block_hash(&mut cur)?;
                let signature = read_signature(&mut cur)?;
                let work = cur.read_u64::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?;
                Block::Receive { previous, source, signature, work }
            }
            BlockType::Open => {
                need(32 + 32 + 32 + 64 + 8)?;
                let source = read_block_hash(&mut cur)?;
                let representative = read_account(&mut cur)?;
                let account = read_account(&mut cur)?;
                let signature = read_signature(&mut cur)?;
                let work = cur.read_u64::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?;
                Block::Open { source, representative, account, signature, work }
            }
            BlockType::Change => {
                need(32 + 32 + 64 + 8)?;
                let previous = read_block_hash(&mut cur)?;
                let representative = read_account(&mut cur)?;
                let signature = read_signature(&mut cur)?;
                let work = cur.read_u64::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?;
                Block::Change { previous, representative, signature, work }
            }
            BlockType::State => {
                need(32 + 32 + 32 + 16 + 32 + 64 + 8)?;
                let account = read_account(&mut cur)?;
                let previous = read_block_hash(&mut cur)?;
                let representative = read_account(&mut cur)?;
                let balance = read_u128(&mut cur)?;
                let link = read_hash(&mut cur)?;
                let signature = read_signature(&mut cur)?;
                let work = cur.read_u64::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?;
                Block::State { account, previous, representative, balance, link, signature, work }
            }
        };
        if (cur.position() as usize) != bytes.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(block)
    }
}

fn read_hash(cur: &mut std::io::Cursor<&[u8]>) -> Result<Hash, CodecError> {
    let mut buf = [0u8; 32];
    std::io::Read::read_exact(cur, &mut buf).map_err(|_| CodecError::Truncated { needed: 32, have: 0 })?;
    Ok(Hash(buf))
}

fn read_block_hash(cur: &mut std::io::Cursor<&[u8]>) -> Result<BlockHash, CodecError> {
    Ok(BlockHash(read_hash(cur)?))
}

fn read_account(cur: &mut std::io::Cursor<&[u8]>) -> Result<Account, CodecError> {
    Ok(Account(read_hash(cur)?))
}

fn read_signature(cur: &mut std::io::Cursor<&[u8]>) -> Result<Signature, CodecError> {
    let mut buf = [0u8; 64];
    std::io::Read::read_exact(cur, &mut buf).map_err(|_| CodecError::Truncated { needed: 64, have: 0 })?;
    Ok(Signature(buf))
}

fn read_u128(cur: &mut std::io::Cursor<&[u8]>) -> Result<u128, CodecError> {
    cur.read_u128::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 16, have: 0 })
}

/// Packed sideband detail byte: epoch in the low 5 bits, then
/// `is_send`/`is_receive`/`is_epoch` each one bit, matching the
/// `block_details` bit layout of `original_source/oslo/lib/blocks.hpp`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockDetails {
    pub epoch: Epoch,
    pub is_send: bool,
    pub is_receive: bool,
    pub is_epoch: bool,
}

const EPOCH_MASK: u8 = 0b0001_1111;
const IS_SEND_BIT: u8 = 1 << 5;
const IS_RECEIVE_BIT: u8 = 1 << 6;
const IS_EPOCH_BIT: u8 = 1 << 7;

impl BlockDetails {
    pub fn to_byte(self) -> u8 {
        (self.epoch.as_u8() & EPOCH_MASK)
            | if self.is_send { IS_SEND_BIT } else { 0 }
            | if self.is_receive { IS_RECEIVE_BIT } else { 0 }
            | if self.is_epoch { IS_EPOCH_BIT } else { 0 }
    }

    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        let epoch = match b & EPOCH_MASK {
            0 => Epoch::Epoch0,
            1 => Epoch::Epoch1,
            2 => Epoch::Epoch2,
            _ => return Err(CodecError::MalformedStateLink),
        };
        Ok(BlockDetails {
            epoch,
            is_send: b & IS_SEND_BIT != 0,
            is_receive: b & IS_RECEIVE_BIT != 0,
            is_epoch: b & IS_EPOCH_BIT != 0,
        })
    }
}

/// Unsigned metadata attached to a block once committed. Never part of the
/// signed body; its `successor` field is the only thing ever mutated after
/// insertion (when a later block chains onto this one).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sideband {
    pub successor: BlockHash,
    pub account: Account,
    pub balance: Amount,
    pub height: u64,
    pub timestamp: u64,
    pub details: BlockDetails,
}

impl Sideband {
    /// Encodes the sideband, omitting fields the block body already
    /// carries or that are fixed by convention for the given block type:
    /// `open` blocks omit `account`/`height` (height is always 1 and the
    /// account is the block's own `account` field); `send` blocks omit
    /// `balance` (present in the body already); `state` blocks append the
    /// packed details byte.
    pub fn encode(&self, block_type: BlockType) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(self.successor.as_bytes());
        if block_type != BlockType::Open {
            buf.extend_from_slice(self.account.as_bytes());
        }
        if block_type != BlockType::Send {
            buf.extend_from_slice(&self.balance.to_be_bytes());
        }
        if block_type != BlockType::Open {
            buf.write_u64::<BigEndian>(self.height).expect("vec write cannot fail");
        }
        buf.write_u64::<BigEndian>(self.timestamp).expect("vec write cannot fail");
        if block_type == BlockType::State {
            buf.push(self.details.to_byte());
        }
        buf
    }

    /// Decodes a sideband for `block_type`. `account_hint`/`height_hint`
    /// supply the values omitted from the wire form for `open` blocks
    /// (the caller always has them on hand: the account is the key under
    /// which the block is stored, and height is always 1 for an opener).
    pub fn decode(
        bytes: &[u8],
        block_type: BlockType,
        account_hint: Account,
        height_hint: u64,
    ) -> Result<Self, CodecError> {
        let mut cur = std::io::Cursor::new(bytes);
        let successor = read_block_hash(&mut cur)?;
        let account = if block_type != BlockType::Open {
            read_account(&mut cur)?
        } else {
            account_hint
        };
        let balance = if block_type != BlockType::Send {
            read_u128(&mut cur)?
        } else {
            0
        };
        let height = if block_type != BlockType::Open {
            cur.read_u64::<BigEndian>().map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?
        } else {
            height_hint
        };
        let timestamp = cur
            .read_u64::<BigEndian>()
            .map_err(|_| CodecError::Truncated { needed: 8, have: 0 })?;
        let details = if block_type == BlockType::State {
            let mut b = [0u8; 1];
            std::io::Read::read_exact(&mut cur, &mut b).map_err(|_| CodecError::Truncated { needed: 1, have: 0 })?;
            BlockDetails::from_byte(b[0])?
        } else {
            BlockDetails { epoch: Epoch::Epoch0, is_send: false, is_receive: false, is_epoch: false }
        };
        Ok(Sideband { successor, account, balance, height, timestamp, details })
    }
}

// --- JSON form -------------------------------------------------------
//
// Hashes/signatures/work in uppercase hex, account in the canonical
// base-32 address form, balance as a decimal string. A plain
// `#[derive(Serialize)]` on `Block` would instead emit the in-memory
// representation (byte arrays, tuple-enum shape), which is not the shape
// consumers of this format expect.

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockJson {
    Send {
        previous: String,
        destination: String,
        balance: String,
        signature: String,
        work: String,
    },
    Receive {
        previous: String,
        source: String,
        signature: String,
        work: String,
    },
    Open {
        source: String,
        representative: String,
        account: String,
        signature: String,
        work: String,
    },
    Change {
        previous: String,
        representative: String,
        signature: String,
        work: String,
    },
    State {
        account: String,
        previous: String,
        representative: String,
        balance: String,
        link: String,
        signature: String,
        work: String,
    },
}

impl From<&Block> for BlockJson {
    fn from(b: &Block) -> Self {
        match b {
            Block::Send { previous, destination, balance, signature, work } => BlockJson::Send {
                previous: previous.0.to_hex(),
                destination: destination.to_address(),
                balance: balance.to_string(),
                signature: signature.to_hex(),
                work: format!("{:016X}", work),
            },
            Block::Receive { previous, source, signature, work } => BlockJson::Receive {
                previous: previous.0.to_hex(),
                source: source.0.to_hex(),
                signature: signature.to_hex(),
                work: format!("{:016X}", work),
            },
            Block::Open { source, representative, account, signature, work } => BlockJson::Open {
                source: source.0.to_hex(),
                representative: representative.to_address(),
                account: account.to_address(),
                signature: signature.to_hex(),
                work: format!("{:016X}", work),
            },
            Block::Change { previous, representative, signature, work } => BlockJson::Change {
                previous: previous.0.to_hex(),
                representative: representative.to_address(),
                signature: signature.to_hex(),
                work: format!("{:016X}", work),
            },
            Block::State { account, previous, representative, balance, link, signature, work } => BlockJson::State {
                account: account.to_address(),
                previous: previous.0.to_hex(),
                representative: representative.to_address(),
                balance: balance.to_string(),
                link: link.to_hex(),
                signature: signature.to_hex(),
                work: format!("{:016X}", work),
            },
        }
    }
}

impl TryFrom<BlockJson> for Block {
    type Error = CodecError;

    fn try_from(j: BlockJson) -> Result<Self, CodecError> {
        fn hash(s: &str) -> Result<Hash, CodecError> {
            Hash::from_hex(s).ok_or(CodecError::InvalidAddress)
        }
        fn block_hash(s: &str) -> Result<BlockHash, CodecError> {
            Ok(BlockHash(hash(s)?))
        }
        fn account(s: &str) -> Result<Account, CodecError> {
            Account::from_address(s).ok_or(CodecError::InvalidAddress)
        }
        fn signature(s: &str) -> Result<Signature, CodecError> {
            Signature::from_hex(s).ok_or(CodecError::InvalidAddress)
        }
        fn work(s: &str) -> Result<u64, CodecError> {
            u64::from_str_radix(s, 16).map_err(|_| CodecError::InvalidAddress)
        }
        fn balance(s: &str) -> Result<Amount, CodecError> {
            s.parse::<u128>().map_err(|_| CodecError::InvalidAddress)
        }

        Ok(match j {
            BlockJson::Send { previous, destination, balance: bal, signature: sig, work: w } => Block::Send {
                previous: block_hash(&previous)?,
                destination: account(&destination)?,
                balance: balance(&bal)?,
                signature: signature(&sig)?,
                work: work(&w)?,
            },
            BlockJson::Receive { previous, source, signature: sig, work: w } => Block::Receive {
                previous: block_hash(&previous)?,
                source: block_hash(&source)?,
                signature: signature(&sig)?,
                work: work(&w)?,
            },
            BlockJson::Open { source, representative, account: acc, signature: sig, work: w } => Block::Open {
                source: block_hash(&source)?,
                representative: account(&representative)?,
                account: account(&acc)?,
                signature: signature(&sig)?,
                work: work(&w)?,
            },
            BlockJson::Change { previous, representative, signature: sig, work: w } => Block::Change {
                previous: block_hash(&previous)?,
                representative: account(&representative)?,
                signature: signature(&sig)?,
                work: work(&w)?,
            },
            BlockJson::State { account: acc, previous, representative, balance: bal, link, signature: sig, work: w } => {
                Block::State {
                    account: account(&acc)?,
                    previous: block_hash(&previous)?,
                    representative: account(&representative)?,
                    balance: balance(&bal)?,
                    link: hash(&link)?,
                    signature: signature(&sig)?,
                    work: work(&w)?,
                }
            }
        })
    }
}

impl Serialize for Block {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        BlockJson::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = BlockJson::deserialize(deserializer)?;
        Block::try_from(json).map_err(serde::de::Error::custom)
    }
}
