//! Wire message framing: the 8-byte header and the eleven message payloads
//! built on top of it.
//!
//! Grounded on the framing style of `darkrenaissance-darkfi`'s
//! packet/message enums: a tagged enum plus an explicit header struct
//! with manual encode/decode rather than a derived form, since (as with
//! the block codec) the byte layout is normative.

use byteorder::{ByteOrder, LittleEndian};

use crate::block::{Block, BlockType};
use crate::error::{CodecError, MessageError};
use crate::types::{Account, BlockHash, Hash, Root};
use crate::vote::{Vote, VotePayload};

pub const MAGIC: [u8; 2] = *b"DC";
pub const HEADER_LEN: usize = 8;
pub const MAX_CONFIRM_REQ_PAIRS: usize = 7;
pub const MAX_VOTE_HASHES: usize = 12;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Keepalive = 0,
    Publish = 1,
    ConfirmReq = 2,
    ConfirmAck = 3,
    BulkPull = 4,
    BulkPush = 5,
    BulkPullAccount = 6,
    FrontierReq = 7,
    NodeIdHandshake = 8,
    TelemetryReq = 9,
    TelemetryAck = 10,
}

impl MessageType {
    fn from_tag(tag: u8) -> Result<Self, MessageError> {
        Ok(match tag {
            0 => MessageType::Keepalive,
            1 => MessageType::Publish,
            2 => MessageType::ConfirmReq,
            3 => MessageType::ConfirmAck,
            4 => MessageType::BulkPull,
            5 => MessageType::BulkPush,
            6 => MessageType::BulkPullAccount,
            7 => MessageType::FrontierReq,
            8 => MessageType::NodeIdHandshake,
            9 => MessageType::TelemetryReq,
            10 => MessageType::TelemetryAck,
            other => return Err(MessageError::UnknownMessageType(other)),
        })
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Extension bitset packed into the header's final two little-endian
/// bytes: block-type nibble (bits 8-11), count nibble (bits 12-15), and
/// type-specific flags in bits 0-7.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Extensions(pub u16);

impl Extensions {
    pub fn block_type(self) -> Option<BlockType> {
        let nibble = ((self.0 >> 8) & 0xF) as u8;
        BlockType::from_tag(nibble).ok()
    }

    pub fn with_block_type(mut self, bt: BlockType) -> Self {
        self.0 = (self.0 & !0x0F00) | ((bt.tag() as u16) << 8);
        self
    }

    pub fn count(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    pub fn with_count(mut self, count: u8) -> Self {
        self.0 = (self.0 & !0xF000) | (((count & 0xF) as u16) << 12);
        self
    }

    pub fn flags(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.0 = (self.0 & !0x00FF) | flags as u16;
        self
    }

    /// Telemetry payload size, packed into the low 11 bits for that
    /// message type.
    pub fn telemetry_size(self) -> u16 {
        self.0 & 0x07FF
    }

    pub fn with_telemetry_size(mut self, size: u16) -> Self {
        self.0 = (self.0 & !0x07FF) | (size & 0x07FF);
        self
    }

    const BULK_PULL_COUNT_PRESENT: u8 = 1 << 0;
    const HANDSHAKE_QUERY: u8 = 1 << 0;
    const HANDSHAKE_RESPONSE: u8 = 1 << 1;

    pub fn bulk_pull_count_present(self) -> bool {
        self.flags() & Self::BULK_PULL_COUNT_PRESENT != 0
    }

    pub fn handshake_is_query(self) -> bool {
        self.flags() & Self::HANDSHAKE_QUERY != 0
    }

    pub fn handshake_is_response(self) -> bool {
        self.flags() & Self::HANDSHAKE_RESPONSE != 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub version_max: u8,
    pub version_using: u8,
    pub version_min: u8,
    pub message_type: MessageType,
    pub extensions: Extensions,
}

impl Header {
    pub fn new(message_type: MessageType, version_using: u8, extensions: Extensions) -> Self {
        Header {
            version_max: version_using,
            version_using,
            version_min: version_using,
            message_type,
            extensions,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2] = self.version_max;
        buf[3] = self.version_using;
        buf[4] = self.version_min;
        buf[5] = self.message_type.tag();
        LittleEndian::write_u16(&mut buf[6..8], self.extensions.0);
        buf
    }

    /// Decodes the header, rejecting bad magic and a `version_using` below
    /// `min_accepted_version`.
    pub fn decode(bytes: &[u8], min_accepted_version: u8) -> Result<Self, MessageError> {
        if bytes.len() < HEADER_LEN {
            return Err(MessageError::Codec(CodecError::Truncated { needed: HEADER_LEN, have: bytes.len() }));
        }
        if bytes[0..2] != MAGIC {
            return Err(MessageError::BadMagic);
        }
        let version_using = bytes[3];
        if version_using < min_accepted_version {
            return Err(MessageError::VersionTooOld { using: version_using, min: min_accepted_version });
        }
        let message_type = MessageType::from_tag(bytes[5])?;
        let extensions = Extensions(LittleEndian::read_u16(&bytes[6..8]));
        Ok(Header {
            version_max: bytes[2],
            version_using,
            version_min: bytes[4],
            message_type,
            extensions,
        })
    }

    /// Size in bytes of the payload that must follow this header, derived
    /// purely from `message_type` and `extensions` so a streaming reader
    /// can frame the next message before any payload bytes arrive.
    /// `None` means the header's extensions don't describe a decodable
    /// shape (e.g. an unset block-type nibble on `publish`).
    pub fn payload_len(&self) -> Option<usize> {
        match self.message_type {
            MessageType::Keepalive | MessageType::BulkPush | MessageType::TelemetryReq => Some(0),
            MessageType::Publish => self.extensions.block_type().map(block_body_len),
            MessageType::ConfirmReq => {
                let count = self.extensions.count();
                if count == 0 {
                    self.extensions.block_type().map(block_body_len)
                } else {
                    Some(count as usize * 64)
                }
            }
            MessageType::ConfirmAck => {
                let count = self.extensions.count();
                let body_len = if count == 0 {
                    block_body_len(self.extensions.block_type()?)
                } else {
                    count as usize * 32
                };
                Some(32 + 64 + 8 + body_len)
            }
            MessageType::BulkPull => {
                Some(64 + if self.extensions.bulk_pull_count_present() { 4 } else { 0 })
            }
            MessageType::BulkPullAccount => Some(48),
            MessageType::FrontierReq => Some(40),
            MessageType::NodeIdHandshake => {
                let mut len = 0;
                if self.extensions.handshake_is_query() {
                    len += 32;
                }
                if self.extensions.handshake_is_response() {
                    len += 32 + 64;
                }
                Some(len)
            }
            MessageType::TelemetryAck => Some(self.extensions.telemetry_size() as usize),
        }
    }
}

/// Encoded byte length of a block body for each type, matching
/// `Block::decode`'s per-variant `need()` calls.
fn block_body_len(bt: BlockType) -> usize {
    match bt {
        BlockType::Send => 32 + 32 + 16 + 64 + 8,
        BlockType::Receive => 32 + 32 + 64 + 8,
        BlockType::Open => 32 + 32 + 32 + 64 + 8,
        BlockType::Change => 32 + 32 + 64 + 8,
        BlockType::State => 32 + 32 + 32 + 16 + 32 + 64 + 8,
    }
}

/// `confirm_req`'s payload: either a full block, or up to
/// [`MAX_CONFIRM_REQ_PAIRS`] `(hash, root)` pairs.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmReqPayload {
    Block(Box<Block>),
    Pairs(Vec<(BlockHash, Root)>),
}

impl ConfirmReqPayload {
    pub fn pairs(hashes: Vec<(BlockHash, Root)>) -> Result<Self, MessageError> {
        if hashes.len() > MAX_CONFIRM_REQ_PAIRS {
            return Err(MessageError::TooManyConfirmReqPairs(hashes.len()));
        }
        Ok(ConfirmReqPayload::Pairs(hashes))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ConfirmReqPayload::Block(block) => block.encode(),
            ConfirmReqPayload::Pairs(pairs) => {
                let mut buf = Vec::with_capacity(pairs.len() * 64);
                for (hash, root) in pairs {
                    buf.extend_from_slice(hash.as_bytes());
                    buf.extend_from_slice(root.0.as_bytes());
                }
                buf
            }
        }
    }

    /// Decodes a full block when `extensions` carries no pair count, or
    /// `count` `(hash, root)` pairs otherwise.
    pub fn decode(bytes: &[u8], extensions: Extensions) -> Result<Self, MessageError> {
        let count = extensions.count();
        if count == 0 {
            let block_type = extensions.block_type().ok_or_else(|| {
                MessageError::Codec(CodecError::UnknownBlockType((extensions.0 >> 8 & 0xF) as u8))
            })?;
            let block = Block::decode(block_type, bytes)?;
            Ok(ConfirmReqPayload::Block(Box::new(block)))
        } else {
            let count = count as usize;
            let need = count * 64;
            if bytes.len() != need {
                return Err(MessageError::Codec(CodecError::Truncated { needed: need, have: bytes.len() }));
            }
            let mut pairs = Vec::with_capacity(count);
            for chunk in bytes.chunks(64) {
                let hash = BlockHash(Hash(chunk[0..32].try_into().unwrap()));
                let root = Root(Hash(chunk[32..64].try_into().unwrap()));
                pairs.push((hash, root));
            }
            ConfirmReqPayload::pairs(pairs)
        }
    }
}

/// `confirm_ack`'s payload: a vote whose own payload is a block or up to
/// [`MAX_VOTE_HASHES`] hashes — see [`crate::vote::VotePayload`].
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmAckPayload {
    pub vote: Vote,
}

impl ConfirmAckPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.vote.encode()
    }

    pub fn decode(bytes: &[u8], extensions: Extensions) -> Result<Self, MessageError> {
        let vote = Vote::decode(bytes, extensions.count(), extensions.block_type())?;
        Ok(ConfirmAckPayload { vote })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrontierReqPayload {
    pub start: crate::types::Account,
    pub age: u32,
    pub count: u32,
}

impl FrontierReqPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40);
        buf.extend_from_slice(self.start.as_bytes());
        buf.extend_from_slice(&self.age.to_be_bytes());
        buf.extend_from_slice(&self.count.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() != 40 {
            return Err(MessageError::Codec(CodecError::Truncated { needed: 40, have: bytes.len() }));
        }
        let start = Account(Hash(bytes[0..32].try_into().unwrap()));
        let age = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
        let count = u32::from_be_bytes(bytes[36..40].try_into().unwrap());
        Ok(FrontierReqPayload { start, age, count })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BulkPullPayload {
    pub start: crate::types::Account,
    pub end: BlockHash,
    pub count: Option<u32>,
}

impl BulkPullPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(68);
        buf.extend_from_slice(self.start.as_bytes());
        buf.extend_from_slice(self.end.as_bytes());
        if let Some(count) = self.count {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        buf
    }

    /// `extensions.bulk_pull_count_present()` tells us whether the
    /// trailing count field was sent at all.
    pub fn decode(bytes: &[u8], extensions: Extensions) -> Result<Self, MessageError> {
        let count_present = extensions.bulk_pull_count_present();
        let need = 64 + if count_present { 4 } else { 0 };
        if bytes.len() != need {
            return Err(MessageError::Codec(CodecError::Truncated { needed: need, have: bytes.len() }));
        }
        let start = Account(Hash(bytes[0..32].try_into().unwrap()));
        let end = BlockHash(Hash(bytes[32..64].try_into().unwrap()));
        let count = if count_present {
            Some(u32::from_be_bytes(bytes[64..68].try_into().unwrap()))
        } else {
            None
        };
        Ok(BulkPullPayload { start, end, count })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BulkPullAccountPayload {
    pub account: crate::types::Account,
    pub minimum_amount: crate::types::Amount,
}

impl BulkPullAccountPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(48);
        buf.extend_from_slice(self.account.as_bytes());
        buf.extend_from_slice(&self.minimum_amount.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() != 48 {
            return Err(MessageError::Codec(CodecError::Truncated { needed: 48, have: bytes.len() }));
        }
        let account = Account(Hash(bytes[0..32].try_into().unwrap()));
        let minimum_amount = u128::from_be_bytes(bytes[32..48].try_into().unwrap());
        Ok(BulkPullAccountPayload { account, minimum_amount })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeIdHandshakePayload {
    pub query: Option<[u8; 32]>,
    pub response: Option<(crate::types::Account, crate::types::Signature)>,
}

impl NodeIdHandshakePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 64);
        if let Some(query) = &self.query {
            buf.extend_from_slice(query);
        }
        if let Some((account, signature)) = &self.response {
            buf.extend_from_slice(account.as_bytes());
            buf.extend_from_slice(signature.as_bytes());
        }
        buf
    }

    /// Which of `query`/`response` are present, and therefore how much of
    /// `bytes` belongs to each, comes from the header's handshake flags.
    pub fn decode(bytes: &[u8], extensions: Extensions) -> Result<Self, MessageError> {
        let mut cursor = 0usize;
        let query = if extensions.handshake_is_query() {
            let need = cursor + 32;
            if bytes.len() < need {
                return Err(MessageError::Codec(CodecError::Truncated { needed: need, have: bytes.len() }));
            }
            let q: [u8; 32] = bytes[cursor..cursor + 32].try_into().unwrap();
            cursor += 32;
            Some(q)
        } else {
            None
        };
        let response = if extensions.handshake_is_response() {
            let need = cursor + 32 + 64;
            if bytes.len() < need {
                return Err(MessageError::Codec(CodecError::Truncated { needed: need, have: bytes.len() }));
            }
            let account = Account(Hash(bytes[cursor..cursor + 32].try_into().unwrap()));
            cursor += 32;
            let signature = crate::types::Signature(bytes[cursor..cursor + 64].try_into().unwrap());
            cursor += 64;
            Some((account, signature))
        } else {
            None
        };
        if cursor != bytes.len() {
            return Err(MessageError::Codec(CodecError::TrailingBytes));
        }
        Ok(NodeIdHandshakePayload { query, response })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetryAckPayload {
    pub data: Vec<u8>,
}

impl TelemetryAckPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn decode(bytes: &[u8], extensions: Extensions) -> Result<Self, MessageError> {
        let expected = extensions.telemetry_size() as usize;
        if bytes.len() != expected {
            return Err(MessageError::Codec(CodecError::Truncated { needed: expected, have: bytes.len() }));
        }
        Ok(TelemetryAckPayload { data: bytes.to_vec() })
    }
}

/// A fully framed message: header plus the decoded payload for the types
/// this crate cares about. `bulk_push`/`keepalive`/`telemetry_req` carry no
/// payload beyond the header and are represented by unit variants.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Keepalive,
    Publish(Box<Block>),
    ConfirmReq(ConfirmReqPayload),
    ConfirmAck(ConfirmAckPayload),
    BulkPull(BulkPullPayload),
    BulkPush,
    BulkPullAccount(BulkPullAccountPayload),
    FrontierReq(FrontierReqPayload),
    NodeIdHandshake(NodeIdHandshakePayload),
    TelemetryReq,
    TelemetryAck(TelemetryAckPayload),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Keepalive => MessageType::Keepalive,
            Message::Publish(_) => MessageType::Publish,
            Message::ConfirmReq(_) => MessageType::ConfirmReq,
            Message::ConfirmAck(_) => MessageType::ConfirmAck,
            Message::BulkPull(_) => MessageType::BulkPull,
            Message::BulkPush => MessageType::BulkPush,
            Message::BulkPullAccount(_) => MessageType::BulkPullAccount,
            Message::FrontierReq(_) => MessageType::FrontierReq,
            Message::NodeIdHandshake(_) => MessageType::NodeIdHandshake,
            Message::TelemetryReq => MessageType::TelemetryReq,
            Message::TelemetryAck(_) => MessageType::TelemetryAck,
        }
    }

    /// The extensions word that must accompany this message's header so
    /// `payload_len` on the decoding side can frame the body correctly.
    fn extensions(&self) -> Extensions {
        match self {
            Message::Keepalive | Message::BulkPush | Message::TelemetryReq => Extensions::default(),
            Message::Publish(block) => Extensions::default().with_block_type(block.block_type()),
            Message::ConfirmReq(ConfirmReqPayload::Block(block)) => {
                Extensions::default().with_block_type(block.block_type())
            }
            Message::ConfirmReq(ConfirmReqPayload::Pairs(pairs)) => {
                Extensions::default().with_count(pairs.len() as u8)
            }
            Message::ConfirmAck(ack) => match &ack.vote.payload {
                VotePayload::Block(block) => Extensions::default().with_block_type(block.block_type()),
                VotePayload::Hashes(hashes) => Extensions::default().with_count(hashes.len() as u8),
            },
            Message::BulkPull(payload) => {
                if payload.count.is_some() {
                    Extensions::default().with_flags(Extensions::BULK_PULL_COUNT_PRESENT)
                } else {
                    Extensions::default()
                }
            }
            Message::BulkPullAccount(_) => Extensions::default(),
            Message::FrontierReq(_) => Extensions::default(),
            Message::NodeIdHandshake(payload) => {
                let mut flags = 0u8;
                if payload.query.is_some() {
                    flags |= Extensions::HANDSHAKE_QUERY;
                }
                if payload.response.is_some() {
                    flags |= Extensions::HANDSHAKE_RESPONSE;
                }
                Extensions::default().with_flags(flags)
            }
            Message::TelemetryAck(payload) => {
                Extensions::default().with_telemetry_size(payload.data.len() as u16)
            }
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        match self {
            Message::Keepalive | Message::BulkPush | Message::TelemetryReq => Vec::new(),
            Message::Publish(block) => block.encode(),
            Message::ConfirmReq(payload) => payload.encode(),
            Message::ConfirmAck(payload) => payload.encode(),
            Message::BulkPull(payload) => payload.encode(),
            Message::BulkPullAccount(payload) => payload.encode(),
            Message::FrontierReq(payload) => payload.encode(),
            Message::NodeIdHandshake(payload) => payload.encode(),
            Message::TelemetryAck(payload) => payload.encode(),
        }
    }

    /// Encodes the full wire form: an 8-byte header followed by this
    /// message's payload.
    pub fn encode(&self, version_using: u8) -> Vec<u8> {
        let header = Header::new(self.message_type(), version_using, self.extensions());
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(&self.payload_bytes());
        buf
    }

    /// Decodes a header plus its exact payload from `bytes`. Trailing
    /// bytes beyond the header's declared `payload_len` are rejected.
    pub fn decode(bytes: &[u8], min_accepted_version: u8) -> Result<Self, MessageError> {
        let header = Header::decode(bytes, min_accepted_version)?;
        let body = &bytes[HEADER_LEN..];
        let expected = header
            .payload_len()
            .ok_or_else(|| MessageError::Codec(CodecError::UnknownBlockType(0)))?;
        if body.len() != expected {
            return Err(MessageError::Codec(CodecError::Truncated { needed: expected, have: body.len() }));
        }
        let message = match header.message_type {
            MessageType::Keepalive => Message::Keepalive,
            MessageType::Publish => {
                let block_type = header.extensions.block_type().ok_or_else(|| {
                    MessageError::Codec(CodecError::UnknownBlockType((header.extensions.0 >> 8 & 0xF) as u8))
                })?;
                Message::Publish(Box::new(Block::decode(block_type, body)?))
            }
            MessageType::ConfirmReq => Message::ConfirmReq(ConfirmReqPayload::decode(body, header.extensions)?),
            MessageType::ConfirmAck => Message::ConfirmAck(ConfirmAckPayload::decode(body, header.extensions)?),
            MessageType::BulkPull => Message::BulkPull(BulkPullPayload::decode(body, header.extensions)?),
            MessageType::BulkPush => Message::BulkPush,
            MessageType::BulkPullAccount => Message::BulkPullAccount(BulkPullAccountPayload::decode(body)?),
            MessageType::FrontierReq => Message::FrontierReq(FrontierReqPayload::decode(body)?),
            MessageType::NodeIdHandshake => {
                Message::NodeIdHandshake(NodeIdHandshakePayload::decode(body, header.extensions)?)
            }
            MessageType::TelemetryReq => Message::TelemetryReq,
            MessageType::TelemetryAck => Message::TelemetryAck(TelemetryAckPayload::decode(body, header.extensions)?),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let ext = Extensions::default().with_block_type(BlockType::State).with_count(3);
        let header = Header::new(MessageType::ConfirmAck, 18, ext);
        let bytes = header.encode();
        assert_eq!(&bytes[0..2], &MAGIC);
        let decoded = Header::decode(&bytes, 17).expect("decode should succeed");
        assert_eq!(decoded, header);
        assert_eq!(decoded.extensions.block_type(), Some(BlockType::State));
        assert_eq!(decoded.extensions.count(), 3);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = Header::new(MessageType::Keepalive, 18, Extensions::default()).encode();
        bytes[0] = b'X';
        assert_eq!(Header::decode(&bytes, 17), Err(MessageError::BadMagic));
    }

    #[test]
    fn header_rejects_version_below_minimum() {
        let bytes = Header::new(MessageType::Keepalive, 5, Extensions::default()).encode();
        assert_eq!(
            Header::decode(&bytes, 17),
            Err(MessageError::VersionTooOld { using: 5, min: 17 })
        );
    }

    #[test]
    fn confirm_req_rejects_too_many_pairs() {
        let pairs = vec![(BlockHash::ZERO, Root::default()); MAX_CONFIRM_REQ_PAIRS + 1];
        assert_eq!(
            ConfirmReqPayload::pairs(pairs),
            Err(MessageError::TooManyConfirmReqPairs(MAX_CONFIRM_REQ_PAIRS + 1))
        );
    }

    #[test]
    fn extensions_telemetry_size_is_11_bits() {
        let ext = Extensions::default().with_telemetry_size(2047);
        assert_eq!(ext.telemetry_size(), 2047);
        let ext_overflow = Extensions::default().with_telemetry_size(4000);
        assert_eq!(ext_overflow.telemetry_size(), 4000 & 0x07FF);
    }

    fn sample_send_block() -> Block {
        Block::Send {
            previous: BlockHash(Hash::digest(b"prev")),
            destination: Account(Hash::digest(b"dest")),
            balance: 1_000,
            signature: crate::types::Signature([9u8; 64]),
            work: 42,
        }
    }

    #[test]
    fn header_payload_len_matches_block_body_for_publish() {
        let header = Header::new(
            MessageType::Publish,
            18,
            Extensions::default().with_block_type(BlockType::Send),
        );
        assert_eq!(header.payload_len(), Some(block_body_len(BlockType::Send)));
    }

    #[test]
    fn header_payload_len_is_zero_for_unit_messages() {
        let header = Header::new(MessageType::Keepalive, 18, Extensions::default());
        assert_eq!(header.payload_len(), Some(0));
    }

    #[test]
    fn header_payload_len_accounts_for_bulk_pull_count_flag() {
        let without_count = Header::new(MessageType::BulkPull, 18, Extensions::default());
        assert_eq!(without_count.payload_len(), Some(64));

        let with_count =
            Header::new(MessageType::BulkPull, 18, Extensions::default().with_flags(Extensions::BULK_PULL_COUNT_PRESENT));
        assert_eq!(with_count.payload_len(), Some(68));
    }

    #[test]
    fn message_publish_roundtrips() {
        let message = Message::Publish(Box::new(sample_send_block()));
        let bytes = message.encode(18);
        let decoded = Message::decode(&bytes, 17).expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_confirm_req_pairs_roundtrips() {
        let pairs = vec![
            (BlockHash(Hash::digest(b"h1")), Root(Hash::digest(b"r1"))),
            (BlockHash(Hash::digest(b"h2")), Root(Hash::digest(b"r2"))),
        ];
        let message = Message::ConfirmReq(ConfirmReqPayload::pairs(pairs).unwrap());
        let bytes = message.encode(18);
        let decoded = Message::decode(&bytes, 17).expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_confirm_ack_roundtrips() {
        let vote = Vote {
            account: Account(Hash::digest(b"rep")),
            signature: crate::types::Signature([3u8; 64]),
            sequence: 7,
            payload: VotePayload::hashes(vec![BlockHash(Hash::digest(b"h1"))]).unwrap(),
        };
        let message = Message::ConfirmAck(ConfirmAckPayload { vote });
        let bytes = message.encode(18);
        let decoded = Message::decode(&bytes, 17).expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_bulk_pull_roundtrips_with_and_without_count() {
        let with_count = Message::BulkPull(BulkPullPayload {
            start: Account(Hash::digest(b"start")),
            end: BlockHash(Hash::digest(b"end")),
            count: Some(5),
        });
        let bytes = with_count.encode(18);
        assert_eq!(Message::decode(&bytes, 17).unwrap(), with_count);

        let without_count = Message::BulkPull(BulkPullPayload {
            start: Account(Hash::digest(b"start")),
            end: BlockHash(Hash::digest(b"end")),
            count: None,
        });
        let bytes = without_count.encode(18);
        assert_eq!(Message::decode(&bytes, 17).unwrap(), without_count);
    }

    #[test]
    fn message_node_id_handshake_roundtrips_query_and_response() {
        let message = Message::NodeIdHandshake(NodeIdHandshakePayload {
            query: Some([1u8; 32]),
            response: Some((Account(Hash::digest(b"rep")), crate::types::Signature([2u8; 64]))),
        });
        let bytes = message.encode(18);
        let decoded = Message::decode(&bytes, 17).expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_telemetry_ack_roundtrips() {
        let message = Message::TelemetryAck(TelemetryAckPayload { data: vec![1, 2, 3, 4, 5] });
        let bytes = message.encode(18);
        let decoded = Message::decode(&bytes, 17).expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_decode_rejects_trailing_bytes() {
        let message = Message::Keepalive;
        let mut bytes = message.encode(18);
        bytes.push(0);
        assert!(Message::decode(&bytes, 17).is_err());
    }
}
