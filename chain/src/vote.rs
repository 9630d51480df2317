//! Vote & election store (C6): signed opinions over blocks or hashes, with
//! sequence-ordered replay protection (§4.10).
//!
//! A vote's hash domain-separates "one full block" from "one or more
//! hashes" so a representative can vote either way without the two forms
//! ever colliding.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::block::StateBlock;
use crate::numbers::{Account, Hash, Signature, blake2b_256};
use crate::store::WriteTxn;

/// What a vote is actually opining on.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum VoteTarget {
    /// One or more competing block hashes for a root (the common case
    /// once an election is underway).
    Hashes(Vec<Hash>),
    /// A single full block, sent the first time a representative votes
    /// for a freshly-seen candidate so peers that haven't seen it yet can
    /// adopt it directly from the vote.
    Block(Box<StateBlock>),
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub account: Account,
    pub signature: Signature,
    pub sequence: u64,
    pub target: VoteTarget,
}

/// Outcome of submitting a vote to the node (§4.10 "Vote ingress").
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum VoteCode {
    /// Accepted: strictly higher sequence than anything seen before from
    /// this account.
    Vote,
    /// Signature did not verify.
    Invalid,
    /// `sequence` was not strictly greater than the stored sequence for
    /// this account; the vote is a replay and is ignored.
    Replay,
}

impl Vote {
    /// `hash()` (§4.10): BLAKE2b-256 over the vote's preimage, which is
    /// domain-separated by target shape:
    ///
    /// - a single full block: just that block's hash,
    /// - anything else (a hash list, including a singleton): the ASCII
    ///   tag `"vote "` followed by the concatenated hashes,
    ///
    /// followed in both cases by the little-endian 8-byte sequence number.
    pub fn hash(&self) -> Hash {
        let mut preimage = Vec::new();
        match &self.target {
            VoteTarget::Block(block) => {
                preimage.extend_from_slice(block.hash().as_bytes());
            }
            VoteTarget::Hashes(hashes) => {
                preimage.extend_from_slice(b"vote ");
                for h in hashes {
                    preimage.extend_from_slice(&h.0);
                }
            }
        }
        preimage.extend_from_slice(&self.sequence.to_le_bytes());
        Hash(blake2b_256(&preimage))
    }

    pub fn sign(&mut self, signing_key: &SigningKey) {
        let hash = self.hash();
        let sig: DalekSignature = signing_key.sign(hash.as_bytes());
        self.signature = Signature(sig.to_bytes());
    }

    pub fn verify(&self) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.account.0) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&self.signature.0);
        verifying_key.verify(self.hash().as_bytes(), &sig).is_ok()
    }

    /// The hashes this vote opines on, regardless of target shape — used
    /// by the election tally to know which competing blocks to update.
    pub fn hashes(&self) -> Vec<Hash> {
        match &self.target {
            VoteTarget::Block(block) => vec![block.hash()],
            VoteTarget::Hashes(hashes) => hashes.clone(),
        }
    }

    /// Validates the signature and applies sequence-ordered replay
    /// protection against the `vote` table, persisting the vote on
    /// success (§4.10).
    pub fn ingest(&self, txn: &WriteTxn<'_>) -> Result<VoteCode, crate::store::StoreError> {
        if !self.verify() {
            return Ok(VoteCode::Invalid);
        }
        if let Some(stored) = txn.get_vote(self.account)? {
            if stored.sequence >= self.sequence {
                return Ok(VoteCode::Replay);
            }
        }
        txn.put_vote(self)?;
        Ok(VoteCode::Vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbers::HASH_LEN;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, Account) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let account = Account(signing_key.verifying_key().to_bytes());
        (signing_key, account)
    }

    #[test]
    fn single_block_target_hashes_without_tag() {
        let (signing_key, account) = keypair();
        let block = StateBlock {
            account,
            creation_time: crate::numbers::ShortTimestamp(1),
            previous: Hash::ZERO,
            representative: account,
            balance: crate::numbers::Amount(1),
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: crate::numbers::Work(0),
        };
        let mut vote = Vote {
            account,
            signature: Signature::ZERO,
            sequence: 1,
            target: VoteTarget::Block(Box::new(block)),
        };
        vote.sign(&signing_key);
        assert!(vote.verify());

        let mut expected_preimage = block.hash().as_bytes().to_vec();
        expected_preimage.extend_from_slice(&1u64.to_le_bytes());
        assert_eq!(vote.hash(), Hash(blake2b_256(&expected_preimage)));
    }

    #[test]
    fn hash_list_target_uses_vote_tag() {
        let (signing_key, account) = keypair();
        let hashes = vec![Hash([1u8; HASH_LEN]), Hash([2u8; HASH_LEN])];
        let mut vote = Vote {
            account,
            signature: Signature::ZERO,
            sequence: 5,
            target: VoteTarget::Hashes(hashes.clone()),
        };
        vote.sign(&signing_key);

        let mut expected_preimage = b"vote ".to_vec();
        for h in &hashes {
            expected_preimage.extend_from_slice(&h.0);
        }
        expected_preimage.extend_from_slice(&5u64.to_le_bytes());
        assert_eq!(vote.hash(), Hash(blake2b_256(&expected_preimage)));
    }

    #[test]
    fn ingest_rejects_replayed_sequence() {
        use tempfile::TempDir;
        let tmp = TempDir::new().unwrap();
        let store = crate::store::Store::open(&crate::store::StoreConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        })
        .unwrap();

        let (signing_key, account) = keypair();
        let mut vote = Vote {
            account,
            signature: Signature::ZERO,
            sequence: 3,
            target: VoteTarget::Hashes(vec![Hash([9u8; HASH_LEN])]),
        };
        vote.sign(&signing_key);

        let txn = store.begin_write();
        assert_eq!(vote.ingest(&txn).unwrap(), VoteCode::Vote);
        txn.commit().unwrap();

        let mut replay = Vote {
            account,
            signature: Signature::ZERO,
            sequence: 3,
            target: VoteTarget::Hashes(vec![Hash([8u8; HASH_LEN])]),
        };
        replay.sign(&signing_key);

        let txn2 = store.begin_write();
        assert_eq!(replay.ingest(&txn2).unwrap(), VoteCode::Replay);
        txn2.commit().unwrap();
    }

    #[test]
    fn ingest_rejects_bad_signature() {
        use tempfile::TempDir;
        let tmp = TempDir::new().unwrap();
        let store = crate::store::Store::open(&crate::store::StoreConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        })
        .unwrap();

        let (_signing_key, account) = keypair();
        let vote = Vote {
            account,
            signature: Signature::ZERO,
            sequence: 1,
            target: VoteTarget::Hashes(vec![Hash([1u8; HASH_LEN])]),
        };
        let txn = store.begin_write();
        assert_eq!(vote.ingest(&txn).unwrap(), VoteCode::Invalid);
        txn.abort();
    }
}
