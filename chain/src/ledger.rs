//! Ledger core (C4): the block-admission algorithm (§4.3) and rollback.
//!
//! The ledger holds an *unowned* reference to the [`Store`] — the store is
//! owned by the node, and the ledger borrows it for the duration of each
//! call (§9 "Cyclic ownership"). Every [`Ledger::process`] call validates
//! exactly one candidate block against one write-transaction snapshot and
//! either commits a full state transition or aborts with a tagged
//! rejection; there is no other path out.

use crate::block::{CommentBlock, StateBlock, Subtype};
use crate::network::NetworkParams;
use crate::numbers::{Account, Amount, Hash, ShortTimestamp};
use crate::store::{AccountRecord, PendingRecord, Store, StoreError, WriteTxn};

/// Tolerance (§4.3 step 6) for a block's creation time against its own
/// chain's previous block.
pub const SHORT_TOLERANCE_SECS: u32 = 66;
/// Tolerance (§4.3 step 8) for a receive's creation time against the send
/// it consumes, on another chain — wide enough to absorb a badly-set
/// clock on either side.
pub const LONG_TOLERANCE_SECS: u32 = 33_360;

/// Every tagged verdict admission can return (§7 taxonomy).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum AdmitCode {
    Progress,
    GapPrevious,
    GapSource,
    BadSignature,
    Old,
    Fork,
    Unreceivable,
    NegativeSpend,
    BalanceMismatch,
    BlockPosition,
    InvalidStateBlock,
    InvalidBlockCreationTime,
    SendSameAccount,
    OpenedBurnAccount,
}

/// Result contract (§4.4): on any non-[`AdmitCode::Progress`] outcome,
/// only `code` is meaningful — callers must not read the other fields.
#[derive(Clone, Copy, Debug)]
pub struct AdmitResult {
    pub code: AdmitCode,
    pub account: Account,
    pub amount: Amount,
    pub pending_account: Account,
    pub state_subtype: Option<Subtype>,
}

impl AdmitResult {
    fn rejected(code: AdmitCode) -> Self {
        AdmitResult {
            code,
            account: Account::ZERO,
            amount: Amount::ZERO,
            pending_account: Account::ZERO,
            state_subtype: None,
        }
    }
}

pub struct Ledger<'a> {
    store: &'a Store,
    pub params: NetworkParams,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a Store, params: NetworkParams) -> Self {
        Ledger { store, params }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Inserts the network's genesis block directly, bypassing normal
    /// admission (the genesis has no predecessor to validate against).
    /// Returns `Ok(false)` without writing anything if a genesis row
    /// already exists (idempotent bring-up).
    pub fn ensure_genesis(&self, genesis: &StateBlock) -> Result<bool, StoreError> {
        let txn = self.store.begin_write();
        if txn.get_account(self.params.genesis_account)?.is_some() {
            txn.abort();
            return Ok(false);
        }
        let hash = genesis.hash();
        txn.block_put(hash, genesis, Hash::ZERO)?;
        txn.put_account(
            self.params.genesis_account,
            &AccountRecord {
                head: hash,
                rep_block: hash,
                open_block: hash,
                balance: genesis.balance,
                last_block_time: genesis.creation_time,
                block_count: 1,
            },
        )?;
        txn.representation_add(genesis.representative, genesis.balance)?;
        txn.checksum_update(Hash::ZERO, hash)?;
        txn.commit()?;
        Ok(true)
    }

    /// Runs the admission algorithm (§4.3) against one candidate block,
    /// inside its own write transaction.
    pub fn process(&self, block: &StateBlock) -> Result<AdmitResult, StoreError> {
        let txn = self.store.begin_write();
        let result = self.process_in_txn(&txn, block)?;
        if result.code == AdmitCode::Progress {
            txn.commit()?;
        } else {
            txn.abort();
        }
        Ok(result)
    }

    fn process_in_txn(&self, txn: &WriteTxn<'_>, block: &StateBlock) -> Result<AdmitResult, StoreError> {
        let hash = block.hash();

        // 1. Duplicate check.
        if txn.state_block_exists(hash)? {
            return Ok(AdmitResult::rejected(AdmitCode::Old));
        }

        // 2. Creation time sanity.
        if block.creation_time.is_zero() {
            return Ok(AdmitResult::rejected(AdmitCode::InvalidBlockCreationTime));
        }

        // 3. Signature check.
        if !block.verify() {
            return Ok(AdmitResult::rejected(AdmitCode::BadSignature));
        }

        // 4. Burn guard.
        if block.account.is_zero() {
            return Ok(AdmitResult::rejected(AdmitCode::OpenedBurnAccount));
        }

        // 5. Branch on `previous`.
        let prev_account_record: Option<AccountRecord>;
        if !block.has_previous() {
            if !block.has_link() {
                if block.account != self.params.genesis_account {
                    return Ok(AdmitResult::rejected(AdmitCode::GapSource));
                }
                if !block.is_valid_open_subtype(self.params.genesis_account) {
                    return Ok(AdmitResult::rejected(AdmitCode::InvalidStateBlock));
                }
            } else if !block.is_valid_open_subtype(self.params.genesis_account) {
                return Ok(AdmitResult::rejected(AdmitCode::InvalidStateBlock));
            }
            prev_account_record = None;
        } else {
            let Some(account_record) = txn.get_account(block.account)? else {
                return Ok(AdmitResult::rejected(AdmitCode::Fork));
            };
            if !txn.state_block_exists(block.previous)? {
                return Ok(AdmitResult::rejected(AdmitCode::GapPrevious));
            }
            if block.previous != account_record.head {
                return Ok(AdmitResult::rejected(AdmitCode::Fork));
            }
            prev_account_record = Some(account_record);
        }

        // 6. Time monotonicity on same chain.
        if let Some(rec) = &prev_account_record {
            let earliest_allowed = rec.last_block_time.0;
            if block.creation_time.0.saturating_add(SHORT_TOLERANCE_SECS) < earliest_allowed {
                return Ok(AdmitResult::rejected(AdmitCode::InvalidBlockCreationTime));
            }
        }

        // 7. Subtype derivation.
        let prev_balance_time = prev_account_record
            .as_ref()
            .map(|rec| (rec.balance, rec.last_block_time));
        let subtype = block.subtype(prev_balance_time, &self.params);
        if subtype == Subtype::Undefined {
            return Ok(AdmitResult::rejected(AdmitCode::InvalidStateBlock));
        }
        if subtype == Subtype::Change && !block.is_valid_change_subtype() {
            return Ok(AdmitResult::rejected(AdmitCode::InvalidStateBlock));
        }

        let (effective_prev_balance, effective_prev_time) = prev_balance_time
            .map(|(b, t)| (block.balance_manna_adj(b, t, &self.params), t))
            .unwrap_or((Amount::ZERO, block.creation_time));

        // 8. Receive-specific checks.
        let mut pending_account = Account::ZERO;
        let mut delta = Amount::ZERO;
        if subtype == Subtype::Receive || subtype == Subtype::OpenReceive {
            if !block.has_link() {
                return Ok(AdmitResult::rejected(AdmitCode::InvalidStateBlock));
            }
            let Some(link_block) = txn.get_state_block(block.link)? else {
                return Ok(AdmitResult::rejected(AdmitCode::GapSource));
            };
            if block
                .creation_time
                .0
                .saturating_add(LONG_TOLERANCE_SECS)
                < link_block.creation_time.0
            {
                return Ok(AdmitResult::rejected(AdmitCode::InvalidBlockCreationTime));
            }
            let Some(pending) = txn.get_pending(block.account, block.link)? else {
                return Ok(AdmitResult::rejected(AdmitCode::Unreceivable));
            };
            if block.balance.0 <= effective_prev_balance.0 {
                return Ok(AdmitResult::rejected(AdmitCode::BalanceMismatch));
            }
            let received = Amount(block.balance.0 - effective_prev_balance.0);
            if received != pending.amount {
                return Ok(AdmitResult::rejected(AdmitCode::BalanceMismatch));
            }
            pending_account = pending.source_account;
            delta = received;
        }

        // 9. Send-specific checks.
        if subtype == Subtype::Send {
            if block.balance.0 >= effective_prev_balance.0 {
                return Ok(AdmitResult::rejected(AdmitCode::NegativeSpend));
            }
            delta = Amount(effective_prev_balance.0 - block.balance.0);
            if block.creation_time >= self.params.epoch2 && block.link == block.account.as_hash() {
                return Ok(AdmitResult::rejected(AdmitCode::SendSameAccount));
            }
            pending_account = Account(block.link.0);
        }

        let _ = effective_prev_time;

        // 10. Commit.
        self.commit_admitted(txn, block, hash, subtype, &prev_account_record, delta)?;

        Ok(AdmitResult {
            code: AdmitCode::Progress,
            account: block.account,
            amount: delta,
            pending_account,
            state_subtype: Some(subtype),
        })
    }

    fn commit_admitted(
        &self,
        txn: &WriteTxn<'_>,
        block: &StateBlock,
        hash: Hash,
        subtype: Subtype,
        prev_account_record: &Option<AccountRecord>,
        delta: Amount,
    ) -> Result<(), StoreError> {
        txn.block_put(hash, block, Hash::ZERO)?;

        if let Some(rec) = prev_account_record {
            txn.representation_sub(
                txn.get_state_block(block.previous)?
                    .map(|b| b.representative)
                    .unwrap_or(Account::ZERO),
                rec.balance,
            )?;
        }
        txn.representation_add(block.representative, block.balance)?;

        match subtype {
            Subtype::Send => {
                txn.put_pending(
                    Account(block.link.0),
                    hash,
                    &PendingRecord {
                        source_account: block.account,
                        amount: delta,
                    },
                )?;
            }
            Subtype::Receive | Subtype::OpenReceive => {
                txn.delete_pending(block.account, block.link)?;
            }
            _ => {}
        }

        let open_block = match prev_account_record {
            Some(rec) => rec.open_block,
            None => hash,
        };
        let block_count = prev_account_record.as_ref().map(|r| r.block_count + 1).unwrap_or(1);
        let old_head = prev_account_record.as_ref().map(|r| r.head).unwrap_or(Hash::ZERO);

        txn.put_account(
            block.account,
            &AccountRecord {
                head: hash,
                rep_block: hash,
                open_block,
                balance: block.balance,
                last_block_time: block.creation_time,
                block_count,
            },
        )?;

        txn.checksum_update(old_head, hash)?;
        txn.delete_frontier(old_head)?;

        Ok(())
    }

    /// `rollback(hash)` (§4.3): unwinds `block.account`'s chain from its
    /// current head down to (but not including) `hash`, undoing each
    /// block's effects in reverse chain order. If undoing a send would
    /// orphan a downstream receive on another account, that receive's
    /// chain is rolled back first (cascading).
    pub fn rollback(&self, hash: Hash) -> Result<(), StoreError> {
        let txn = self.store.begin_write();
        let anchor = txn
            .get_state_block(hash)?
            .ok_or_else(|| StoreError::Encoding("rollback: unknown anchor block".to_string()))?;
        self.rollback_account_to(&txn, anchor.account, hash)?;
        txn.commit()
    }

    fn rollback_account_to(
        &self,
        txn: &WriteTxn<'_>,
        account: Account,
        down_to_exclusive: Hash,
    ) -> Result<(), StoreError> {
        loop {
            let Some(rec) = txn.get_account(account)? else { return Ok(()) };
            if rec.head == down_to_exclusive {
                return Ok(());
            }
            let head_hash = rec.head;
            let head_block = txn
                .get_state_block(head_hash)?
                .ok_or_else(|| StoreError::Encoding("rollback: missing head block".to_string()))?;

            let prev_balance_time = if head_block.has_previous() {
                txn.get_state_block(head_block.previous)?
                    .map(|b| (b.balance, b.creation_time))
            } else {
                None
            };
            let subtype = head_block.subtype(prev_balance_time, &self.params);

            if subtype == Subtype::Send {
                let destination = Account(head_block.link.0);
                if txn.get_pending(destination, head_hash)?.is_none() {
                    // Already consumed: cascade into the consuming chain
                    // before we can safely remove the pending entry.
                    if let Some(consumer) = self.find_consuming_receive(txn, destination, head_hash)? {
                        let consumer_block = txn
                            .get_state_block(consumer)?
                            .ok_or_else(|| StoreError::Encoding("rollback: missing consumer".to_string()))?;
                        let rollback_to = if consumer_block.has_previous() {
                            consumer_block.previous
                        } else {
                            // The consumer was the account's open block;
                            // unwind the whole chain by rolling back to
                            // the (nonexistent) zero hash sentinel, i.e.
                            // delete the account entirely.
                            Hash::ZERO
                        };
                        if rollback_to.is_zero() {
                            self.rollback_account_fully(txn, destination)?;
                        } else {
                            self.rollback_account_to(txn, destination, rollback_to)?;
                        }
                    }
                }
                txn.delete_pending(destination, head_hash)?;
            } else if subtype == Subtype::Receive || subtype == Subtype::OpenReceive {
                let (prev_balance, _) = prev_balance_time.unwrap_or((Amount::ZERO, head_block.creation_time));
                let adjusted = head_block.balance_manna_adj(prev_balance, head_block.creation_time, &self.params);
                let amount = Amount(head_block.balance.0.saturating_sub(adjusted.0));
                if let Some(source_block) = txn.get_state_block(head_block.link)? {
                    txn.put_pending(
                        head_block.account,
                        head_block.link,
                        &PendingRecord {
                            source_account: source_block.account,
                            amount,
                        },
                    )?;
                }
            }

            // Reverse representation bookkeeping.
            txn.representation_sub(head_block.representative, head_block.balance)?;
            if let Some((prev_balance, _)) = prev_balance_time {
                if let Some(prev_block) = txn.get_state_block(head_block.previous)? {
                    txn.representation_add(prev_block.representative, prev_balance)?;
                }
            }

            if head_block.has_previous() {
                let prev_rec = match prev_balance_time {
                    Some((balance, last_block_time)) => AccountRecord {
                        head: head_block.previous,
                        rep_block: head_block.previous,
                        open_block: rec.open_block,
                        balance,
                        last_block_time,
                        block_count: rec.block_count - 1,
                    },
                    None => unreachable!("previous exists but prev_balance_time is None"),
                };
                txn.put_account(account, &prev_rec)?;
                txn.clear_state_block_successor(head_block.previous)?;
            } else {
                txn.delete_account(account)?;
            }

            txn.delete_state_block(head_hash)?;
            txn.checksum_update(head_hash, head_block.previous)?;
        }
    }

    /// Fully un-opens an account: rolls its whole chain back to nothing.
    /// Used only when cascading into an account whose consuming block was
    /// its own open.
    fn rollback_account_fully(&self, txn: &WriteTxn<'_>, account: Account) -> Result<(), StoreError> {
        loop {
            let Some(rec) = txn.get_account(account)? else { return Ok(()) };
            let head_hash = rec.head;
            if head_hash == rec.open_block {
                // One block left: undo it directly then drop the account row.
                let head_block = txn
                    .get_state_block(head_hash)?
                    .ok_or_else(|| StoreError::Encoding("rollback: missing open block".to_string()))?;
                if head_block.has_link() {
                    if let Some(source_block) = txn.get_state_block(head_block.link)? {
                        txn.put_pending(
                            account,
                            head_block.link,
                            &PendingRecord {
                                source_account: source_block.account,
                                amount: head_block.balance,
                            },
                        )?;
                    }
                }
                txn.representation_sub(head_block.representative, head_block.balance)?;
                txn.delete_account(account)?;
                txn.delete_state_block(head_hash)?;
                txn.checksum_update(head_hash, Hash::ZERO)?;
                return Ok(());
            }
            let parent = txn
                .get_state_block(head_hash)?
                .and_then(|b| if b.has_previous() { Some(b.previous) } else { None });
            match parent {
                Some(previous) => self.rollback_account_to(txn, account, previous)?,
                None => return Ok(()),
            }
        }
    }

    /// Scans `destination`'s chain for the block consuming `send_hash`,
    /// used only by rollback's cascading case. This is a linear scan over
    /// the destination chain; a reverse `send_hash -> receive_hash` index
    /// would make cascading rollback O(1) but the pending table already
    /// tells us the common (not-yet-consumed) case for free, so this path
    /// only runs on the rarer cascade.
    fn find_consuming_receive(
        &self,
        txn: &WriteTxn<'_>,
        destination: Account,
        send_hash: Hash,
    ) -> Result<Option<Hash>, StoreError> {
        let Some(rec) = txn.get_account(destination)? else { return Ok(None) };
        let mut cursor = rec.head;
        loop {
            let Some(block) = txn.get_state_block(cursor)? else { return Ok(None) };
            if block.link == send_hash {
                return Ok(Some(cursor));
            }
            if !block.has_previous() {
                return Ok(None);
            }
            cursor = block.previous;
        }
    }

    /// Admits a comment block (§3.5): signed-by-sender and
    /// `creation_time >= epoch2`, the only two observable constraints
    /// (§9 open question b). Never touches balances or weights.
    pub fn admit_comment(&self, comment: &CommentBlock) -> Result<bool, StoreError> {
        if !comment.is_admissible() {
            return Ok(false);
        }
        let txn = self.store.begin_write();
        txn.put_comment_block(comment.hash(), comment)?;
        txn.commit()?;
        Ok(true)
    }

    pub fn weight(&self, representative: Account) -> Result<Amount, StoreError> {
        let txn = self.store.begin_write();
        let weight = txn.get_representation(representative)?;
        txn.abort();
        Ok(weight)
    }

    pub fn checksum(&self) -> Result<Hash, StoreError> {
        let read = self.store.begin_read();
        read.checksum_get()
    }

    pub fn account_balance_with_manna(&self, account: Account, at: ShortTimestamp) -> Result<Option<Amount>, StoreError> {
        let read = self.store.begin_read();
        let Some(rec) = read.get_account(account)? else { return Ok(None) };
        if account == self.params.manna_account {
            Ok(Some(crate::manna::account_balance_with_manna(
                rec.balance,
                rec.last_block_time,
                at,
                &self.params,
            )))
        } else {
            Ok(Some(rec.balance))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbers::{HASH_LEN, Signature, Work};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use tempfile::TempDir;

    fn open_ledger(tmp: &TempDir, _params: NetworkParams) -> Store {
        Store::open(&crate::store::StoreConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        })
        .unwrap()
    }

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    fn signed_genesis(params: &NetworkParams, key: &SigningKey) -> StateBlock {
        let mut block = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(1),
            previous: Hash::ZERO,
            representative: params.genesis_account,
            balance: params.genesis_amount,
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
        };
        block.sign(key);
        block
    }

    #[test]
    fn genesis_bring_up_sets_balance_and_checksum() {
        let tmp = TempDir::new().unwrap();
        let params = NetworkParams::test();
        let store = open_ledger(&tmp, params);
        let key = keypair();
        // Force genesis account to match this keypair's public key so the
        // signature is meaningful; NetworkParams::test() fixes the byte
        // pattern, so override it for this test via a local params copy.
        let mut params = params;
        params.genesis_account = Account(key.verifying_key().to_bytes());

        let ledger = Ledger::new(&store, params);
        let genesis = signed_genesis(&params, &key);
        assert!(ledger.ensure_genesis(&genesis).unwrap());

        let balance = ledger
            .account_balance_with_manna(params.genesis_account, genesis.creation_time)
            .unwrap()
            .unwrap();
        assert_eq!(balance, params.genesis_amount);
        assert_eq!(ledger.checksum().unwrap(), genesis.hash());
    }

    #[test]
    fn simple_send_and_open_receive() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = open_ledger(&tmp, params);
        let ledger = Ledger::new(&store, params);

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let dest_key = keypair();
        let dest_account = Account(dest_key.verifying_key().to_bytes());

        let sent_amount = Amount(50);
        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - sent_amount.0),
            link: dest_account.as_hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);
        let send_result = ledger.process(&send).unwrap();
        assert_eq!(send_result.code, AdmitCode::Progress);
        assert_eq!(send_result.state_subtype, Some(Subtype::Send));

        let mut open = StateBlock {
            account: dest_account,
            creation_time: ShortTimestamp(11),
            previous: Hash::ZERO,
            representative: dest_account,
            balance: sent_amount,
            link: send.hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        open.sign(&dest_key);
        let open_result = ledger.process(&open).unwrap();
        assert_eq!(open_result.code, AdmitCode::Progress);
        assert_eq!(open_result.state_subtype, Some(Subtype::OpenReceive));

        let read = store.begin_read();
        assert!(read.get_cf("pending", &{
            let mut k = Vec::new();
            k.extend_from_slice(&dest_account.0);
            k.extend_from_slice(&send.hash().0);
            k
        }).unwrap().is_none(), "pending entry should be consumed");

        assert_eq!(ledger.weight(params.genesis_account).unwrap(), Amount(params.genesis_amount.0 - sent_amount.0));
        assert_eq!(ledger.weight(dest_account).unwrap(), sent_amount);
    }

    #[test]
    fn duplicate_block_is_old() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = open_ledger(&tmp, params);
        let ledger = Ledger::new(&store, params);

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - 1),
            link: Hash([1u8; HASH_LEN]),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);
        assert_eq!(ledger.process(&send).unwrap().code, AdmitCode::Progress);
        assert_eq!(ledger.process(&send).unwrap().code, AdmitCode::Old);
    }

    #[test]
    fn send_to_self_after_epoch2_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = open_ledger(&tmp, params);
        let ledger = Ledger::new(&store, params);

        let mut genesis = signed_genesis(&params, &genesis_key);
        genesis.creation_time = params.epoch2;
        ledger.ensure_genesis(&genesis).unwrap();

        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(params.epoch2.0 + 10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - 1),
            link: params.genesis_account.as_hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);
        assert_eq!(ledger.process(&send).unwrap().code, AdmitCode::SendSameAccount);
    }

    #[test]
    fn fork_is_detected_on_second_competing_block() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = open_ledger(&tmp, params);
        let ledger = Ledger::new(&store, params);

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let mut send_a = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - 1),
            link: Hash([1u8; HASH_LEN]),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send_a.sign(&genesis_key);

        let mut send_b = send_a;
        send_b.link = Hash([2u8; HASH_LEN]);
        send_b.sign(&genesis_key);

        assert_eq!(ledger.process(&send_a).unwrap().code, AdmitCode::Progress);
        assert_eq!(ledger.process(&send_b).unwrap().code, AdmitCode::Fork);
    }

    #[test]
    fn receive_balance_mismatch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = open_ledger(&tmp, params);
        let ledger = Ledger::new(&store, params);

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let dest_key = keypair();
        let dest_account = Account(dest_key.verifying_key().to_bytes());
        let sent_amount = 50u64;

        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - sent_amount),
            link: dest_account.as_hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);
        ledger.process(&send).unwrap();

        let mut bad_open = StateBlock {
            account: dest_account,
            creation_time: ShortTimestamp(11),
            previous: Hash::ZERO,
            representative: dest_account,
            balance: Amount(sent_amount + 1),
            link: send.hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        bad_open.sign(&dest_key);
        assert_eq!(ledger.process(&bad_open).unwrap().code, AdmitCode::BalanceMismatch);
    }

    #[test]
    fn rollback_restores_pending_and_prior_head() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = open_ledger(&tmp, params);
        let ledger = Ledger::new(&store, params);

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - 10),
            link: Hash([3u8; HASH_LEN]),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);
        ledger.process(&send).unwrap();

        ledger.rollback(genesis.hash()).unwrap();

        let read = store.begin_read();
        let rec = read.get_account(params.genesis_account).unwrap().unwrap();
        assert_eq!(rec.head, genesis.hash());
        assert_eq!(rec.balance, params.genesis_amount);
        assert!(!txn_has_state_block(&store, send.hash()));
    }

    fn txn_has_state_block(store: &Store, hash: Hash) -> bool {
        let txn = store.begin_write();
        let exists = txn.state_block_exists(hash).unwrap();
        txn.abort();
        exists
    }
}
