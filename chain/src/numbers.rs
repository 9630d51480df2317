//! Fixed-width primitive types and their wire/text encodings.
//!
//! This module defines the opaque fixed-byte identifiers used throughout the
//! ledger (hash, account, public key, signature), the 64-bit amount, the
//! 32-bit compact timestamp, and the bounded variable-length byte string
//! used by comment blocks. All wire and hashing operations use big-endian
//! byte order, matching the domain's hashing preimages.

use std::fmt;

use blake2::Blake2b;
use blake2::digest::{Digest, consts::U32, consts::U40};
use serde::{Deserialize, Serialize};

/// Length in bytes of all 256-bit identifiers (hash, account, public key).
pub const HASH_LEN: usize = 32;
/// Length in bytes of a detached Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

type Blake2b256 = Blake2b<U32>;
type Blake2b40 = Blake2b<U40>;

/// BLAKE2b-256 digest of `data`.
pub fn blake2b_256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut bytes = [0u8; HASH_LEN];
    bytes.copy_from_slice(&out);
    bytes
}

fn blake2b_40(data: &[u8]) -> [u8; 5] {
    let mut hasher = Blake2b40::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut bytes = [0u8; 5];
    bytes.copy_from_slice(&out);
    bytes
}

/// Opaque 256-bit hash: block hashes, link fields, and vote digests all
/// live in this representation.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Hash> {
        if s.len() != HASH_LEN * 2 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
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

/// Account identifier: a raw Ed25519 public key, 32 bytes.
///
/// `Account` and [`PublicKey`] share the same byte representation — an
/// account *is* the public key that controls it — but are kept as distinct
/// newtypes so call sites can't accidentally swap "the account that owns
/// this chain" for "the key bytes used to verify a signature" at the type
/// level, even though the conversion is free.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Account(pub [u8; HASH_LEN]);

impl Account {
    pub const ZERO: Account = Account([0u8; HASH_LEN]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn as_hash(&self) -> Hash {
        Hash(self.0)
    }

    /// Encodes this account as `mik_`-prefixed base32 text (§6.3).
    pub fn encode_account(&self) -> String {
        encode_account_address(&self.0)
    }

    /// Parses a `mik_`/`MIK_`-prefixed base32 account address.
    pub fn decode_account(text: &str) -> Option<Account> {
        decode_account_address(text).map(Account)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.encode_account())
    }
}

impl From<PublicKey> for Account {
    fn from(pk: PublicKey) -> Self {
        Account(pk.0)
    }
}

/// Ed25519 public key bytes. See [`Account`] for why this is a distinct type.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; HASH_LEN]);

impl From<Account> for PublicKey {
    fn from(a: Account) -> Self {
        PublicKey(a.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode_upper(self.0))
    }
}

/// Detached Ed25519 signature, 64 bytes.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    pub const ZERO: Signature = Signature([0u8; SIGNATURE_LEN]);
}

impl Default for Signature {
    fn default() -> Self {
        Signature::ZERO
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}
impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode_upper(self.0))
    }
}

/// Unsigned 64-bit balance/amount, serialized big-endian on the wire and in
/// hashing preimages.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Amount {
        Amount(u64::from_be_bytes(bytes))
    }

    /// Decimal string form, as used by the JSON block representation (§6.4)
    /// where amounts are strings to preserve 64-bit precision.
    pub fn to_decimal_string(&self) -> String {
        self.0.to_string()
    }

    pub fn from_decimal_string(s: &str) -> Option<Amount> {
        s.parse::<u64>().ok().map(Amount)
    }
}

impl std::ops::Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

/// Compile-time origin for [`ShortTimestamp`]: 1 Sept 2018 00:00 UTC, in
/// POSIX seconds.
pub const EPOCH_ORIGIN: u64 = 1_535_760_000;

/// Start of `epoch2`, relative to [`EPOCH_ORIGIN`]. The send-to-self
/// prohibition (§3.3, §4.3 step 9) is keyed on this constant; nothing else
/// currently reads it.
pub const EPOCH2_OFFSET: u32 = 23_587_200;

/// The next epoch boundary, forward-declared but unused by any rule today.
/// Kept as a reserved constant for a future rule set.
#[allow(dead_code)]
pub const EPOCH_NEXT_OFFSET: u32 = 99_929_600;

/// Unsigned 32-bit seconds since [`EPOCH_ORIGIN`].
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ShortTimestamp(pub u32);

impl ShortTimestamp {
    pub const ZERO: ShortTimestamp = ShortTimestamp(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `epoch2` expressed as a [`ShortTimestamp`], for comparisons against
    /// block creation times.
    pub fn epoch2() -> ShortTimestamp {
        ShortTimestamp(EPOCH2_OFFSET)
    }

    /// Converts a POSIX timestamp (seconds since Unix epoch) to a compact
    /// timestamp relative to [`EPOCH_ORIGIN`]. Times before the origin
    /// saturate to zero.
    pub fn from_posix(posix_secs: u64) -> ShortTimestamp {
        ShortTimestamp(posix_secs.saturating_sub(EPOCH_ORIGIN) as u32)
    }

    /// Converts back to a POSIX timestamp.
    pub fn to_posix(&self) -> u64 {
        EPOCH_ORIGIN + self.0 as u64
    }

    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> ShortTimestamp {
        ShortTimestamp(u32::from_be_bytes(bytes))
    }
}

impl std::ops::Add<u32> for ShortTimestamp {
    type Output = ShortTimestamp;
    fn add(self, rhs: u32) -> ShortTimestamp {
        ShortTimestamp(self.0.saturating_add(rhs))
    }
}

/// Unsigned 64-bit proof-of-work nonce.
///
/// Generation and difficulty checking are out of scope (§1): validation is
/// delegated to a [`crate::wire::WorkValidator`] collaborator.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Work(pub u64);

/// Bounded byte string with a 16-bit big-endian length prefix, used as the
/// payload of an (optional) comment record. Up to 65535 bytes on the wire;
/// callers that need the "effective" 64-byte comment bound (§3.5) enforce
/// it themselves — this type only guarantees the wire-level bound.
#[derive(Clone, Default, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct VarLenBytes16(Vec<u8>);

impl VarLenBytes16 {
    /// Builds a `VarLenBytes16`, deterministically truncating to `u16::MAX`
    /// bytes if `data` is longer.
    pub fn new(mut data: Vec<u8>) -> Self {
        if data.len() > u16::MAX as usize {
            data.truncate(u16::MAX as usize);
        }
        VarLenBytes16(data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Account address alphabet: non-standard base32, matches the original
/// `mikron_node` encoding (`rai::account_lookup`).
const ACCOUNT_ALPHABET: &[u8] = b"13456789abcdefghijkmnopqrstuwxyz";

fn alphabet_index(c: u8) -> Option<u8> {
    ACCOUNT_ALPHABET.iter().position(|&b| b == c).map(|i| i as u8)
}

/// Encodes 32 raw account bytes as `mik_`-prefixed base32 text (§6.3).
///
/// A 5-byte BLAKE2b-40 checksum over the key bytes is appended before
/// encoding, so the 60-character body covers `(256 + 40) / 5 = 59.2` →
/// 60 five-bit groups.
fn encode_account_address(key: &[u8; HASH_LEN]) -> String {
    let checksum = blake2b_40(key);

    // Checksum bytes come first in the bit-stream (matches the original
    // encoder), then the key bytes, most-significant-bit first.
    let mut bits: Vec<u8> = Vec::with_capacity((5 + HASH_LEN) * 8);
    for byte in checksum.iter().rev() {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }
    for byte in key {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }

    // Total bits = 40 + 256 = 296, pad to a multiple of 5 (300 bits = 60 groups).
    while bits.len() % 5 != 0 {
        bits.insert(0, 0);
    }

    let mut out = String::with_capacity(4 + bits.len() / 5);
    out.push_str("mik_");
    for chunk in bits.chunks(5) {
        let mut v: u8 = 0;
        for &b in chunk {
            v = (v << 1) | b;
        }
        out.push(ACCOUNT_ALPHABET[v as usize] as char);
    }
    out
}

/// Parses an account address, accepting `mik_`/`MIK_` prefixes and either
/// `_` or `-` as the separator.
fn decode_account_address(text: &str) -> Option<[u8; HASH_LEN]> {
    let bytes = text.as_bytes();
    if bytes.len() != 64 {
        return None;
    }
    let prefix_ok = (bytes[0] == b'm' || bytes[0] == b'M')
        && bytes[1] == b'i'
        && bytes[2] == b'k'
        && (bytes[3] == b'_' || bytes[3] == b'-');
    if !prefix_ok {
        return None;
    }
    let body = &text[4..];
    if body.len() != 60 {
        return None;
    }

    let mut bits: Vec<u8> = Vec::with_capacity(60 * 5);
    for c in body.bytes() {
        let idx = alphabet_index(c.to_ascii_lowercase())?;
        for i in (0..5).rev() {
            bits.push((idx >> i) & 1);
        }
    }

    // Drop the 4 leading padding bits (300 - 296 = 4), then split
    // checksum (40 bits) from key (256 bits).
    let bits = &bits[4..];
    let (checksum_bits, key_bits) = bits.split_at(40);

    let mut checksum = [0u8; 5];
    for (i, chunk) in checksum_bits.chunks(8).enumerate() {
        checksum[i] = bits_to_byte(chunk);
    }
    checksum.reverse();

    let mut key = [0u8; HASH_LEN];
    for (i, chunk) in key_bits.chunks(8).enumerate() {
        key[i] = bits_to_byte(chunk);
    }

    if blake2b_40(&key) != checksum {
        return None;
    }

    Some(key)
}

fn bits_to_byte(bits: &[u8]) -> u8 {
    let mut v = 0u8;
    for &b in bits {
        v = (v << 1) | b;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_address_roundtrips() {
        let key = [7u8; HASH_LEN];
        let account = Account(key);
        let text = account.encode_account();
        assert!(text.starts_with("mik_"));
        assert_eq!(text.len(), 64);

        let decoded = Account::decode_account(&text).expect("valid address");
        assert_eq!(decoded, account);
    }

    #[test]
    fn account_address_accepts_upper_and_dash() {
        let key = [200u8; HASH_LEN];
        let account = Account(key);
        let text = account.encode_account();
        let upper_dash = format!("MIK-{}", &text[4..]);
        let decoded = Account::decode_account(&upper_dash).expect("valid address");
        assert_eq!(decoded, account);
    }

    #[test]
    fn account_address_rejects_corrupted_checksum() {
        let key = [9u8; HASH_LEN];
        let account = Account(key);
        let text = account.encode_account();
        // The first body character encodes (mostly) checksum bits; flipping
        // it to a different alphabet symbol must invalidate the checksum.
        let first_body = text.chars().nth(4).unwrap();
        let replacement = if first_body == '1' { 'z' } else { '1' };
        let mut corrupted: String = text.chars().collect();
        corrupted.replace_range(4..5, &replacement.to_string());
        assert!(Account::decode_account(&corrupted).is_none());
    }

    #[test]
    fn short_timestamp_posix_roundtrip() {
        let posix = EPOCH_ORIGIN + 12345;
        let ts = ShortTimestamp::from_posix(posix);
        assert_eq!(ts.to_posix(), posix);
    }

    #[test]
    fn short_timestamp_before_origin_saturates_to_zero() {
        let ts = ShortTimestamp::from_posix(EPOCH_ORIGIN - 10);
        assert_eq!(ts, ShortTimestamp::ZERO);
    }

    #[test]
    fn blake2b_256_is_deterministic() {
        let h1 = blake2b_256(b"mikron");
        let h2 = blake2b_256(b"mikron");
        assert_eq!(h1, h2);
        assert_ne!(h1, blake2b_256(b"mikron "));
    }

    #[test]
    fn var_len_bytes16_truncates_deterministically() {
        let data = vec![1u8; u16::MAX as usize + 50];
        let v = VarLenBytes16::new(data);
        assert_eq!(v.len(), u16::MAX as usize);
    }
}
