//! Votes: a representative's signed assertion that one or more block
//! hashes are the correct successor at their root.

use crate::block::{Block, BlockType};
use crate::error::{CodecError, MessageError};
use crate::message::MAX_VOTE_HASHES;
use crate::types::{Account, BlockHash, Hash, Signature};

/// Either a full block (used the first time a representative votes for a
/// brand-new block) or a batch of up to [`MAX_VOTE_HASHES`] hashes.
#[derive(Clone, Debug, PartialEq)]
pub enum VotePayload {
    Block(Box<Block>),
    Hashes(Vec<BlockHash>),
}

impl VotePayload {
    pub fn hashes(hashes: Vec<BlockHash>) -> Result<Self, MessageError> {
        if hashes.len() > MAX_VOTE_HASHES {
            return Err(MessageError::TooManyVoteHashes(hashes.len()));
        }
        Ok(VotePayload::Hashes(hashes))
    }

    /// The set of block hashes this vote covers, regardless of payload
    /// shape.
    pub fn block_hashes(&self) -> Vec<BlockHash> {
        match self {
            VotePayload::Block(b) => vec![b.hash()],
            VotePayload::Hashes(h) => h.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Vote {
    pub account: Account,
    pub signature: Signature,
    pub sequence: u64,
    pub payload: VotePayload,
}

impl Vote {
    /// Bytes signed by the voting representative: account, sequence, and
    /// the covered hashes in order. Used both to produce and to verify a
    /// vote's signature.
    pub fn signing_bytes(account: Account, sequence: u64, hashes: &[BlockHash]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 8 + hashes.len() * 32);
        buf.extend_from_slice(account.as_bytes());
        buf.extend_from_slice(&sequence.to_be_bytes());
        for h in hashes {
            buf.extend_from_slice(h.as_bytes());
        }
        buf
    }

    /// Content hash used by the vote uniquer/cache to de-duplicate
    /// identical votes without comparing full payloads.
    pub fn full_hash(&self) -> Hash {
        let hashes = self.payload.block_hashes();
        let mut parts = Self::signing_bytes(self.account, self.sequence, &hashes);
        parts.extend_from_slice(self.signature.as_bytes());
        Hash::digest(&parts)
    }

    /// Wire form: account, signature, sequence, then either a full block
    /// or the covered hashes back to back, matching `confirm_ack`'s
    /// block-type/count extensions nibbles in `message.rs`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 64 + 8 + 256);
        buf.extend_from_slice(self.account.as_bytes());
        buf.extend_from_slice(self.signature.as_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        match &self.payload {
            VotePayload::Block(block) => buf.extend_from_slice(&block.encode()),
            VotePayload::Hashes(hashes) => {
                for h in hashes {
                    buf.extend_from_slice(h.as_bytes());
                }
            }
        }
        buf
    }

    /// `count` and `block_type` come from the carrying message's
    /// extensions: `count == 0` means the payload is a full block of
    /// `block_type`, otherwise it's `count` hashes.
    pub fn decode(bytes: &[u8], count: u8, block_type: Option<BlockType>) -> Result<Self, MessageError> {
        let prefix_len = 32 + 64 + 8;
        if bytes.len() < prefix_len {
            return Err(MessageError::Codec(CodecError::Truncated { needed: prefix_len, have: bytes.len() }));
        }
        let account = Account(Hash(bytes[0..32].try_into().unwrap()));
        let signature = Signature(bytes[32..96].try_into().unwrap());
        let sequence = u64::from_be_bytes(bytes[96..104].try_into().unwrap());
        let body = &bytes[prefix_len..];

        let payload = if count == 0 {
            let block_type = block_type.ok_or(MessageError::Codec(CodecError::UnknownBlockType(0)))?;
            let block = Block::decode(block_type, body)?;
            VotePayload::Block(Box::new(block))
        } else {
            let count = count as usize;
            let need = count * 32;
            if body.len() != need {
                return Err(MessageError::Codec(CodecError::Truncated { needed: need, have: body.len() }));
            }
            let mut hashes = Vec::with_capacity(count);
            for chunk in body.chunks(32) {
                hashes.push(BlockHash(Hash(chunk.try_into().unwrap())));
            }
            VotePayload::hashes(hashes)?
        };

        Ok(Vote { account, signature, sequence, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash as H;

    #[test]
    fn vote_payload_rejects_too_many_hashes() {
        let hashes = vec![BlockHash::ZERO; MAX_VOTE_HASHES + 1];
        assert_eq!(
            VotePayload::hashes(hashes),
            Err(MessageError::TooManyVoteHashes(MAX_VOTE_HASHES + 1))
        );
    }

    #[test]
    fn vote_hashes_payload_roundtrips_through_encode_decode() {
        let account = Account(H::digest(b"rep"));
        let h1 = BlockHash(H::digest(b"b1"));
        let h2 = BlockHash(H::digest(b"b2"));
        let vote = Vote {
            account,
            signature: Signature([7u8; 64]),
            sequence: 42,
            payload: VotePayload::Hashes(vec![h1, h2]),
        };
        let bytes = vote.encode();
        let decoded = Vote::decode(&bytes, 2, None).expect("decode should succeed");
        assert_eq!(decoded, vote);
    }

    #[test]
    fn vote_decode_rejects_truncated_hash_body() {
        let account = Account(H::digest(b"rep"));
        let vote = Vote {
            account,
            signature: Signature([3u8; 64]),
            sequence: 1,
            payload: VotePayload::Hashes(vec![BlockHash(H::digest(b"b1"))]),
        };
        let mut bytes = vote.encode();
        bytes.pop();
        assert!(Vote::decode(&bytes, 1, None).is_err());
    }

    #[test]
    fn full_hash_changes_with_sequence() {
        let account = Account(H::digest(b"rep"));
        let h1 = BlockHash(H::digest(b"b1"));
        let vote_a = Vote {
            account,
            signature: Signature([1u8; 64]),
            sequence: 1,
            payload: VotePayload::Hashes(vec![h1]),
        };
        let mut vote_b = vote_a.clone();
        vote_b.sequence = 2;
        assert_ne!(vote_a.full_hash(), vote_b.full_hash());
    }
}
