//! Core domain types shared across the ledger, codec, and consensus layers.
//!
//! This module defines strongly-typed hashes, account identifiers, and
//! amounts so that the rest of the crate never passes naked byte buffers
//! across an API boundary: newtypes over a BLAKE2b-256 hash family, plus
//! the account/root/qualified-root distinctions the ledger needs.

use std::fmt;

use blake2::Blake2bVar;
use blake2::digest::{Update, VariableOutput};
use serde::{Deserialize, Serialize};

/// Length in bytes of every 256-bit hash type used in this crate.
pub const HASH_LEN: usize = 32;

/// Length in bytes of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Strongly-typed 256-bit hash wrapper (BLAKE2b-256).
///
/// Used as the backing representation for block hashes, account public
/// keys, and roots. Always exactly [`HASH_LEN`] bytes.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Computes the BLAKE2b-256 digest of `data`.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2bVar::new(HASH_LEN).expect("BLAKE2b-256 output length is valid");
        hasher.update(data);
        let mut out = [0u8; HASH_LEN];
        hasher
            .finalize_variable(&mut out)
            .expect("output buffer matches requested digest length");
        Hash(out)
    }

    /// Computes the BLAKE2b-256 digest over the concatenation of several
    /// byte slices, without an intermediate allocation.
    pub fn digest_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Blake2bVar::new(HASH_LEN).expect("BLAKE2b-256 output length is valid");
        for part in parts {
            hasher.update(part);
        }
        let mut out = [0u8; HASH_LEN];
        hasher
            .finalize_variable(&mut out)
            .expect("output buffer matches requested digest length");
        Hash(out)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != HASH_LEN {
            return None;
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Some(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A block's hash, distinguished at the type level from an account or a
/// root so the ledger code cannot accidentally compare across domains.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub Hash);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash(Hash::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.0.to_hex())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An account's Ed25519 public key.
///
/// `Account` is an opaque 32-byte identifier; whether a given byte string
/// is a valid curve point is checked only when a signature is actually
/// verified against it (deferred validation, matching the ledger's own
/// "bad_signature" predicate rather than rejecting at construction time).
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Account(pub Hash);

/// All-zero account, used to mark unopened/burn accounts (spec: "opened_burn_account").
pub const BURN_ACCOUNT: Account = Account(Hash::ZERO);

impl Account {
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    /// Encodes the account in the canonical base-32 address form used by
    /// the JSON surface: a fixed alphabet, the 256-bit key followed by a
    /// 5-byte checksum, rendered 5 bits per character.
    pub fn to_address(&self) -> String {
        let checksum = Self::checksum(&self.0.0);
        let mut bits: Vec<u8> = Vec::with_capacity(260 + 40);
        // Pad the 256-bit key on the left with 4 zero bits so the total is
        // a multiple of 5 (260 bits), matching the reference encoding.
        push_bits(&mut bits, &[0u8], 4);
        push_bits(&mut bits, &self.0.0, HASH_LEN * 8);
        push_bits(&mut bits, &checksum, 40);

        let mut out = String::with_capacity(ADDRESS_PREFIX.len() + bits.len() / 5);
        out.push_str(ADDRESS_PREFIX);
        for chunk in bits.chunks(5) {
            let mut v = 0u8;
            for (i, b) in chunk.iter().enumerate() {
                v |= b << (4 - i);
            }
            out.push(BASE32_ALPHABET[v as usize] as char);
        }
        out
    }

    /// Decodes a canonical base-32 address produced by [`Account::to_address`].
    pub fn from_address(addr: &str) -> Option<Self> {
        let body = addr.strip_prefix(ADDRESS_PREFIX)?;
        if body.len() != 60 {
            return None;
        }
        let mut bits: Vec<u8> = Vec::with_capacity(body.len() * 5);
        for c in body.chars() {
            let idx = BASE32_ALPHABET.iter().position(|&b| b as char == c)? as u8;
            for i in 0..5 {
                bits.push((idx >> (4 - i)) & 1);
            }
        }
        // Skip the 4 leading pad bits, then 256 key bits, then 40 checksum bits.
        let key_bits = &bits[4..4 + 256];
        let checksum_bits = &bits[4 + 256..4 + 256 + 40];

        let mut key = [0u8; HASH_LEN];
        pack_bits(key_bits, &mut key);
        let mut checksum = [0u8; 5];
        pack_bits(checksum_bits, &mut checksum);

        if checksum != Self::checksum(&key) {
            return None;
        }
        Some(Account(Hash(key)))
    }

    /// 5-byte BLAKE2b checksum over the account's public key bytes,
    /// reversed to match the reference implementation's byte order.
    fn checksum(key: &[u8; HASH_LEN]) -> [u8; 5] {
        let mut hasher = Blake2bVar::new(5).expect("5-byte BLAKE2b output is valid");
        hasher.update(key);
        let mut out = [0u8; 5];
        hasher
            .finalize_variable(&mut out)
            .expect("output buffer matches requested digest length");
        out.reverse();
        out
    }
}

const ADDRESS_PREFIX: &str = "drc_";
const BASE32_ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

fn push_bits(out: &mut Vec<u8>, bytes: &[u8], nbits: usize) {
    for i in 0..nbits {
        let byte = bytes[i / 8];
        let bit = (byte >> (7 - (i % 8))) & 1;
        out.push(bit);
    }
}

fn pack_bits(bits: &[u8], out: &mut [u8]) {
    for (i, chunk) in bits.chunks(8).enumerate() {
        let mut v = 0u8;
        for (j, b) in chunk.iter().enumerate() {
            v |= b << (7 - j);
        }
        out[i] = v;
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.to_address())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

/// The root of a block's chain position: `previous` if non-zero, else the
/// account itself (for the opening block).
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Root(pub Hash);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root({})", self.0.to_hex())
    }
}

/// Uniquely identifies an election slot: `(previous, root)`. Two blocks
/// with the same root but different `previous` values (impossible for a
/// normal chain, but the qualifying tuple is still used by the original
/// design) are kept distinct.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct QualifiedRoot {
    pub previous: BlockHash,
    pub root: Root,
}

/// A 512-bit Ed25519 signature.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Default for Signature {
    fn default() -> Self {
        Signature([0u8; SIGNATURE_LEN])
    }
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != SIGNATURE_LEN {
            return None;
        }
        let mut arr = [0u8; SIGNATURE_LEN];
        arr.copy_from_slice(&bytes);
        Some(Signature(arr))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..16])
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}
impl Eq for Signature {}

/// 128-bit unsigned amount, the ledger's native balance/quantity type.
pub type Amount = u128;

/// Protocol feature level tagged on an account; advances only forward and
/// only by one step at a time.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum Epoch {
    Epoch0 = 0,
    Epoch1 = 1,
    Epoch2 = 2,
}

impl Epoch {
    pub fn next(self) -> Option<Epoch> {
        match self {
            Epoch::Epoch0 => Some(Epoch::Epoch1),
            Epoch::Epoch1 => Some(Epoch::Epoch2),
            Epoch::Epoch2 => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_digest_is_deterministic() {
        let h1 = Hash::digest(b"hello world");
        let h2 = Hash::digest(b"hello world");
        assert_eq!(h1, h2);
        assert_ne!(h1, Hash::digest(b"hello world!"));
    }

    #[test]
    fn hash_hex_roundtrip() {
        let h = Hash::digest(b"round trip me");
        let hex = h.to_hex();
        let back = Hash::from_hex(&hex).expect("hex should parse");
        assert_eq!(h, back);
    }

    #[test]
    fn account_address_roundtrip() {
        let account = Account(Hash::digest(b"representative-key"));
        let addr = account.to_address();
        assert!(addr.starts_with("drc_"));
        let back = Account::from_address(&addr).expect("address should parse");
        assert_eq!(account, back);
    }

    #[test]
    fn account_address_rejects_corrupted_checksum() {
        let account = Account(Hash::digest(b"another-key"));
        let mut addr = account.to_address();
        // Flip the last character (part of the checksum) to corrupt it.
        let last = addr.pop().unwrap();
        let replacement = if last == '1' { '3' } else { '1' };
        addr.push(replacement);
        assert!(Account::from_address(&addr).is_none());
    }

    #[test]
    fn epoch_advances_one_step_at_a_time() {
        assert_eq!(Epoch::Epoch0.next(), Some(Epoch::Epoch1));
        assert_eq!(Epoch::Epoch1.next(), Some(Epoch::Epoch2));
        assert_eq!(Epoch::Epoch2.next(), None);
    }
}
