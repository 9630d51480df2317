//! State block: the single concrete block type carried by the ledger.
//!
//! The original node dispatches over a `block_visitor` polymorphic across
//! several legacy block kinds (`send`, `receive`, `open`, `change`) plus the
//! modern `state` kind. Mikron only ever produces and stores state blocks,
//! so rather than model that hierarchy we keep one concrete [`StateBlock`]
//! type and a [`Subtype`] enum derived at validation time — a tagged
//! variant switched on once, not a trait object dispatched at every site
//! (see `DESIGN.md`).

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::network::NetworkParams;
use crate::numbers::{Account, Amount, Hash, HASH_LEN, Signature, ShortTimestamp, Work};

/// Domain-separation tag prepended to the state-block hash preimage so
/// state hashes never collide with any legacy block form. This is the
/// 32-byte big-endian encoding of the integer block-type discriminant `6`.
const STATE_BLOCK_TYPE_TAG: [u8; HASH_LEN] = {
    let mut tag = [0u8; HASH_LEN];
    tag[HASH_LEN - 1] = 6;
    tag
};

/// On-wire fixed size of a serialized state block: 212 bytes.
pub const STATE_BLOCK_WIRE_SIZE: usize = 32 + 4 + 32 + 32 + 8 + 32 + 64 + 8;

/// The six hashable fields of a state block, in serialization order.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Account,
    pub creation_time: ShortTimestamp,
    pub previous: Hash,
    pub representative: Account,
    pub balance: Amount,
    /// Source block hash (receiving) or destination account (sending).
    pub link: Hash,
    pub signature: Signature,
    pub work: Work,
}

/// Derived classification of a state block given the ledger's view of its
/// `previous` block. Never serialized — always recomputed from context.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Subtype {
    OpenGenesis,
    OpenReceive,
    Send,
    Receive,
    Change,
    Undefined,
}

impl StateBlock {
    /// Computes the block hash: BLAKE2b-256 over the domain-separated
    /// preimage of account, creation_time, previous, representative,
    /// balance, and link — all big-endian, in that order.
    pub fn hash(&self) -> Hash {
        let mut preimage = Vec::with_capacity(HASH_LEN * 4 + 4 + 8);
        preimage.extend_from_slice(&STATE_BLOCK_TYPE_TAG);
        preimage.extend_from_slice(&self.account.0);
        preimage.extend_from_slice(&self.creation_time.to_be_bytes());
        preimage.extend_from_slice(&self.previous.0);
        preimage.extend_from_slice(&self.representative.0);
        preimage.extend_from_slice(&self.balance.to_be_bytes());
        preimage.extend_from_slice(&self.link.0);
        Hash(crate::numbers::blake2b_256(&preimage))
    }

    /// Fills `signature` with an Ed25519 signature over `hash()`, using
    /// `signing_key`. The caller is responsible for `signing_key`'s public
    /// key matching `self.account`; this is not re-checked here (the check
    /// belongs to the ledger admission path, via [`StateBlock::verify`]).
    pub fn sign(&mut self, signing_key: &SigningKey) {
        let hash = self.hash();
        let sig: DalekSignature = signing_key.sign(hash.as_bytes());
        self.signature = Signature(sig.to_bytes());
    }

    /// Verifies `signature` against `hash()` using the Ed25519 public key
    /// equal to `account`. Returns `false` on any malformed key or
    /// signature bytes rather than propagating a decode error — signature
    /// failure is itself one outcome of admission (`bad_signature`).
    pub fn verify(&self) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.account.0) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&self.signature.0);
        let hash = self.hash();
        verifying_key.verify(hash.as_bytes(), &sig).is_ok()
    }

    /// Root of the block's chain: `account` for opens, `previous` otherwise
    /// — the key under which elections are indexed (§4.10, GLOSSARY).
    pub fn root(&self) -> Hash {
        if self.previous.is_zero() {
            self.account.as_hash()
        } else {
            self.previous
        }
    }

    pub fn has_previous(&self) -> bool {
        !self.previous.is_zero()
    }

    pub fn has_link(&self) -> bool {
        !self.link.is_zero()
    }

    pub fn has_representative(&self) -> bool {
        !self.representative.is_zero()
    }

    /// Structural predicate for `open_genesis`/`open_receive`: usable
    /// without ledger context. `genesis_account` distinguishes the two.
    pub fn is_valid_open_subtype(&self, genesis_account: Account) -> bool {
        if self.account.is_zero() || self.has_previous() {
            return false;
        }
        if self.account != genesis_account {
            self.has_link()
        } else {
            !self.has_link()
        }
    }

    /// Structural predicate shared by `send`/`receive`: both require a
    /// previous block and a non-zero link; which one it is depends on the
    /// balance delta, resolved by [`StateBlock::subtype`].
    pub fn is_valid_send_or_receive_subtype(&self) -> bool {
        !self.account.is_zero() && self.has_previous() && self.has_link()
    }

    pub fn is_valid_change_subtype(&self) -> bool {
        !self.account.is_zero()
            && self.has_representative()
            && self.has_previous()
            && !self.has_link()
    }

    /// Derives the subtype (§3.3) given the previous block's raw balance
    /// and creation time. `prev` is `None` for the very first block of a
    /// chain. `params` supplies the manna account and cadence used by
    /// [`StateBlock::balance_manna_adj`] — `prev.account` is always
    /// `self.account` here, since both blocks belong to the same chain.
    pub fn subtype(
        &self,
        prev: Option<(Amount, ShortTimestamp)>,
        params: &NetworkParams,
    ) -> Subtype {
        match prev {
            None => {
                if self.has_link() {
                    Subtype::OpenReceive
                } else {
                    Subtype::OpenGenesis
                }
            }
            Some((prev_balance, prev_time)) => {
                let adjusted = self.balance_manna_adj(prev_balance, prev_time, params);
                if self.balance.0 < adjusted.0 {
                    Subtype::Send
                } else if self.balance.0 > adjusted.0 {
                    if self.has_link() {
                        Subtype::Receive
                    } else {
                        Subtype::Undefined
                    }
                } else if !self.has_link() {
                    Subtype::Change
                } else {
                    Subtype::Undefined
                }
            }
        }
    }

    /// `balance_manna_adj(prev)` (§3.3): `prev_balance` unless this chain
    /// belongs to the manna account, in which case the balance is rolled
    /// forward (or back) from `prev_time` to `self.creation_time`.
    pub fn balance_manna_adj(
        &self,
        prev_balance: Amount,
        prev_time: ShortTimestamp,
        params: &NetworkParams,
    ) -> Amount {
        if self.account == params.manna_account {
            crate::manna::manna_adjust(prev_balance, prev_time, self.creation_time, params)
        } else {
            prev_balance
        }
    }

    /// Serializes the fixed 212-byte big-endian wire layout.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.account.0);
        out.extend_from_slice(&self.creation_time.to_be_bytes());
        out.extend_from_slice(&self.previous.0);
        out.extend_from_slice(&self.representative.0);
        out.extend_from_slice(&self.balance.to_be_bytes());
        out.extend_from_slice(&self.link.0);
        out.extend_from_slice(&self.signature.0);
        out.extend_from_slice(&self.work.0.to_be_bytes());
    }

    /// Deserializes a state block from exactly [`STATE_BLOCK_WIRE_SIZE`]
    /// bytes. Returns `None` on short input; there is no "unknown type
    /// byte" to reject here since the caller (the wire parser) has already
    /// consumed the leading block-type byte and dispatched on it.
    pub fn deserialize(bytes: &[u8]) -> Option<StateBlock> {
        if bytes.len() != STATE_BLOCK_WIRE_SIZE {
            return None;
        }
        let mut off = 0usize;
        macro_rules! take {
            ($n:expr) => {{
                let slice = &bytes[off..off + $n];
                off += $n;
                slice
            }};
        }
        let mut account = [0u8; HASH_LEN];
        account.copy_from_slice(take!(HASH_LEN));
        let mut creation_time = [0u8; 4];
        creation_time.copy_from_slice(take!(4));
        let mut previous = [0u8; HASH_LEN];
        previous.copy_from_slice(take!(HASH_LEN));
        let mut representative = [0u8; HASH_LEN];
        representative.copy_from_slice(take!(HASH_LEN));
        let mut balance = [0u8; 8];
        balance.copy_from_slice(take!(8));
        let mut link = [0u8; HASH_LEN];
        link.copy_from_slice(take!(HASH_LEN));
        let mut signature = [0u8; 64];
        signature.copy_from_slice(take!(64));
        let mut work = [0u8; 8];
        work.copy_from_slice(take!(8));

        Some(StateBlock {
            account: Account(account),
            creation_time: ShortTimestamp::from_be_bytes(creation_time),
            previous: Hash(previous),
            representative: Account(representative),
            balance: Amount::from_be_bytes(balance),
            link: Hash(link),
            signature: Signature(signature),
            work: Work(u64::from_be_bytes(work)),
        })
    }

    /// JSON form (§6.4): field names match §3.2, amount/timestamp as
    /// decimal strings, hash/account fields as uppercase hex.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "state",
            "account": self.account.encode_account(),
            "creation_time": self.creation_time.0.to_string(),
            "previous": self.previous.to_hex(),
            "representative": self.representative.encode_account(),
            "balance": self.balance.to_decimal_string(),
            "link": self.link.to_hex(),
            "signature": hex::encode_upper(self.signature.0),
            "work": format!("{:016X}", self.work.0),
        })
    }
}

/// Optional carrier for a short account note (§3.5). Lives in its own
/// table and never affects balances, weights, or pending entries.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct CommentBlock {
    pub account: Account,
    pub creation_time: ShortTimestamp,
    pub previous: Hash,
    pub payload: crate::numbers::VarLenBytes16,
    pub signature: Signature,
}

/// Effective payload bound for comment blocks (§3.5): the wire type allows
/// up to 65535 bytes, but a comment is truncated deterministically to this
/// many bytes before it is ever hashed or signed.
pub const COMMENT_EFFECTIVE_MAX_BYTES: usize = 64;

impl CommentBlock {
    pub fn hash(&self) -> Hash {
        let mut preimage = Vec::with_capacity(HASH_LEN * 2 + 4 + self.payload.len());
        preimage.extend_from_slice(&self.account.0);
        preimage.extend_from_slice(&self.creation_time.to_be_bytes());
        preimage.extend_from_slice(&self.previous.0);
        let truncated = &self.payload.as_slice()[..self.payload.len().min(COMMENT_EFFECTIVE_MAX_BYTES)];
        preimage.extend_from_slice(truncated);
        Hash(crate::numbers::blake2b_256(&preimage))
    }

    pub fn verify(&self) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.account.0) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&self.signature.0);
        verifying_key.verify(self.hash().as_bytes(), &sig).is_ok()
    }

    /// The only two observable admission constraints for comment blocks:
    /// signed by the sender and created no earlier than `epoch2`.
    pub fn is_admissible(&self) -> bool {
        self.creation_time >= ShortTimestamp::epoch2() && self.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn signed_block(account: Account, signing_key: &SigningKey) -> StateBlock {
        let mut block = StateBlock {
            account,
            creation_time: ShortTimestamp(1000),
            previous: Hash::ZERO,
            representative: account,
            balance: Amount(100),
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
        };
        block.sign(signing_key);
        block
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let account = Account(signing_key.verifying_key().to_bytes());
        let block = signed_block(account, &signing_key);
        assert!(block.verify());
    }

    #[test]
    fn tampered_block_fails_verification() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let account = Account(signing_key.verifying_key().to_bytes());
        let mut block = signed_block(account, &signing_key);
        block.balance = Amount(101);
        assert!(!block.verify());
    }

    #[test]
    fn serialize_roundtrip_preserves_fields() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let account = Account(signing_key.verifying_key().to_bytes());
        let block = signed_block(account, &signing_key);

        let mut bytes = Vec::new();
        block.serialize(&mut bytes);
        assert_eq!(bytes.len(), STATE_BLOCK_WIRE_SIZE);

        let decoded = StateBlock::deserialize(&bytes).expect("valid wire bytes");
        assert_eq!(decoded, block);
    }

    #[test]
    fn subtype_open_genesis_vs_open_receive() {
        let params = NetworkParams::test();
        let account = Account([1u8; HASH_LEN]);
        let mut block = StateBlock {
            account,
            creation_time: ShortTimestamp(1),
            previous: Hash::ZERO,
            representative: account,
            balance: Amount(0),
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
        };
        assert_eq!(block.subtype(None, &params), Subtype::OpenGenesis);
        block.link = Hash([9u8; HASH_LEN]);
        assert_eq!(block.subtype(None, &params), Subtype::OpenReceive);
    }

    #[test]
    fn subtype_send_receive_change() {
        let params = NetworkParams::test();
        let account = Account([2u8; HASH_LEN]);
        let prev_time = ShortTimestamp(5);
        let mut block = StateBlock {
            account,
            creation_time: ShortTimestamp(10),
            previous: Hash([3u8; HASH_LEN]),
            representative: account,
            balance: Amount(50),
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
        };
        // balance decreased: send (link set to a destination account)
        block.link = Hash([4u8; HASH_LEN]);
        assert_eq!(
            block.subtype(Some((Amount(100), prev_time)), &params),
            Subtype::Send
        );

        // balance increased with link: receive
        block.balance = Amount(150);
        assert_eq!(
            block.subtype(Some((Amount(100), prev_time)), &params),
            Subtype::Receive
        );

        // balance unchanged, no link: change
        block.balance = Amount(100);
        block.link = Hash::ZERO;
        assert_eq!(
            block.subtype(Some((Amount(100), prev_time)), &params),
            Subtype::Change
        );

        // balance increased, no link: undefined
        block.balance = Amount(150);
        assert_eq!(
            block.subtype(Some((Amount(100), prev_time)), &params),
            Subtype::Undefined
        );
    }

    #[test]
    fn subtype_uses_manna_adjustment_for_manna_account() {
        // The manna account's previous balance rolls forward with time, so
        // an unchanged *stored* balance against a later timestamp reads as
        // a send of the accrued amount, not a no-op change.
        let params = NetworkParams::test();
        let prev_time = ShortTimestamp(0);
        let block = StateBlock {
            account: params.manna_account,
            creation_time: ShortTimestamp(params.manna_frequency_secs as u32 * 10),
            previous: Hash([1u8; HASH_LEN]),
            representative: params.manna_account,
            balance: Amount(1_000),
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
        };
        assert_eq!(
            block.subtype(Some((Amount(1_000), prev_time)), &params),
            Subtype::Send
        );
    }

    #[test]
    fn comment_block_requires_epoch2_and_signature() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let account = Account(signing_key.verifying_key().to_bytes());

        let mut comment = CommentBlock {
            account,
            creation_time: ShortTimestamp::epoch2(),
            previous: Hash::ZERO,
            payload: crate::numbers::VarLenBytes16::new(b"hello".to_vec()),
            signature: Signature::ZERO,
        };
        let hash = comment.hash();
        let sig = signing_key.sign(hash.as_bytes());
        comment.signature = Signature(sig.to_bytes());
        assert!(comment.is_admissible());

        comment.creation_time = ShortTimestamp(0);
        assert!(!comment.is_admissible());
    }
}
