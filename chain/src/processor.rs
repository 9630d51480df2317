//! Block processor and gap cache (C11, §4.9).
//!
//! A single-writer queue that accepts `(block, arrival_time)` pairs and
//! runs each through ledger admission. Blocks that name a missing
//! dependency are parked in the gap cache (an in-memory dependency
//! multimap, mirroring `unchecked`) rather than retried eagerly; arrival
//! of the dependency triggers a resubmission pass.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;

use crate::block::StateBlock;
use crate::elections::ElectionsTable;
use crate::ledger::{AdmitCode, Ledger};
use crate::numbers::Hash;
use crate::store::{Store, StoreError};

/// One observed outcome of processing a block, surfaced to observers
/// (§4.9 step 2 "raise an observer event").
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ProcessorEvent {
    /// Admitted; republish and check the gap cache for children.
    Progress(Hash),
    /// Parked pending a missing dependency.
    Gapped(Hash),
    /// Lost a fork race; an election was started or updated.
    ForkDetected(Hash),
    /// Any other rejection: logged and dropped.
    Dropped(Hash, AdmitCode),
}

struct QueueEntry {
    block: StateBlock,
    #[allow(dead_code)]
    arrival_time: Instant,
}

/// In-memory dependency multimap: missing hash → dependent blocks waiting
/// on it (§B "gap cache keyed by missing hash, multimap semantics"). A
/// block can appear under both its `previous` and its `link` if both are
/// absent; it naturally resolves (or re-gaps on the other dependency) the
/// next time either arrives.
#[derive(Default)]
struct GapCache {
    waiting_on: HashMap<Hash, Vec<StateBlock>>,
}

impl GapCache {
    fn insert(&mut self, missing: Hash, dependent: StateBlock) {
        let entry = self.waiting_on.entry(missing).or_default();
        if !entry.iter().any(|b| b.hash() == dependent.hash()) {
            entry.push(dependent);
        }
    }

    fn take_waiting_on(&mut self, satisfied: Hash) -> Vec<StateBlock> {
        self.waiting_on.remove(&satisfied).unwrap_or_default()
    }
}

/// Single-writer validate-and-apply queue (C11). Owns no store directly —
/// every call borrows a [`Ledger`] for the duration of one drain.
pub struct BlockProcessor {
    queue: Mutex<VecDeque<QueueEntry>>,
    gap_cache: Mutex<GapCache>,
    events: Mutex<Vec<ProcessorEvent>>,
}

impl Default for BlockProcessor {
    fn default() -> Self {
        BlockProcessor { queue: Mutex::new(VecDeque::new()), gap_cache: Mutex::new(GapCache::default()), events: Mutex::new(Vec::new()) }
    }
}

impl BlockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a candidate block for processing, tagged with its
    /// observed arrival time.
    pub fn enqueue(&self, block: StateBlock, arrival_time: Instant) {
        self.queue.lock().push_back(QueueEntry { block, arrival_time });
    }

    /// Drains every currently-queued block through admission, so callers
    /// (notably bootstrap) can observe the effects before proceeding
    /// (§4.9 "`flush()` drains pending work").
    pub fn flush(&self, ledger: &Ledger<'_>, elections: &ElectionsTable) -> Result<Vec<ProcessorEvent>, StoreError> {
        let mut emitted = Vec::new();
        loop {
            let entry = self.queue.lock().pop_front();
            let Some(entry) = entry else { break };
            let event = self.process_one(ledger, elections, entry.block)?;
            emitted.push(event);
        }
        let mut events = self.events.lock();
        events.extend(emitted.iter().copied());
        Ok(emitted)
    }

    fn process_one(
        &self,
        ledger: &Ledger<'_>,
        elections: &ElectionsTable,
        block: StateBlock,
    ) -> Result<ProcessorEvent, StoreError> {
        let hash = block.hash();
        let result = ledger.process(&block)?;
        let event = match result.code {
            AdmitCode::Progress => {
                self.resubmit_children(ledger, elections, hash)?;
                ProcessorEvent::Progress(hash)
            }
            AdmitCode::GapPrevious => {
                self.persist_gap(ledger, block.previous, &block)?;
                self.gap_cache.lock().insert(block.previous, block);
                ProcessorEvent::Gapped(hash)
            }
            AdmitCode::GapSource => {
                self.persist_gap(ledger, block.link, &block)?;
                self.gap_cache.lock().insert(block.link, block);
                ProcessorEvent::Gapped(hash)
            }
            AdmitCode::Fork => {
                elections.start_or_update(block);
                ProcessorEvent::ForkDetected(hash)
            }
            other => ProcessorEvent::Dropped(hash, other),
        };
        Ok(event)
    }

    /// Persists a gapped block into the `unchecked` table (§4.9 step 3,
    /// §3.4 "`unchecked` is populated when admission returns
    /// `gap_previous`/`gap_source`"), alongside the in-memory gap cache
    /// entry, so a block arriving out of order survives a restart rather
    /// than only living in process memory.
    fn persist_gap(&self, ledger: &Ledger<'_>, missing: Hash, dependent: &StateBlock) -> Result<(), StoreError> {
        let txn = ledger.store().begin_write();
        txn.unchecked_put(missing, dependent)?;
        txn.commit()
    }

    /// After a block at `satisfied` is admitted, resubmits every block
    /// that was waiting on it as a dependency (§4.9 step 2), draining the
    /// persisted `unchecked` entry for `satisfied` at the same time (§3.4
    /// "entries are drained when a dependency arrives").
    fn resubmit_children(&self, ledger: &Ledger<'_>, elections: &ElectionsTable, satisfied: Hash) -> Result<(), StoreError> {
        let txn = ledger.store().begin_write();
        txn.unchecked_delete(satisfied)?;
        txn.commit()?;

        let children = self.gap_cache.lock().take_waiting_on(satisfied);
        for child in children {
            let event = self.process_one(ledger, elections, child)?;
            self.events.lock().push(event);
        }
        Ok(())
    }

    /// Rehydrates the in-memory gap cache from the persisted `unchecked`
    /// table (§3.4), so blocks gapped before a restart still resubmit once
    /// their dependency shows up again rather than sitting forgotten.
    /// Intended to be called once at startup, before the gossip/bootstrap
    /// loops begin feeding the processor.
    pub fn load_unchecked(&self, store: &Store) -> Result<(), StoreError> {
        let txn = store.begin_read();
        let rows = txn.unchecked_all()?;
        let mut gap_cache = self.gap_cache.lock();
        for (missing, dependents) in rows {
            for dependent in dependents {
                gap_cache.insert(missing, dependent);
            }
        }
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn gap_cache_len(&self) -> usize {
        self.gap_cache.lock().waiting_on.len()
    }

    /// Drains and returns every event raised since the last call.
    pub fn take_events(&self) -> Vec<ProcessorEvent> {
        std::mem::take(&mut self.events.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkParams;
    use crate::numbers::{Account, Amount, HASH_LEN, Signature, ShortTimestamp, Work};
    use crate::store::{Store, StoreConfig};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use tempfile::TempDir;

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
    fn out_of_order_blocks_resolve_once_dependency_arrives() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = Store::open(&StoreConfig { path: tmp.path().to_string_lossy().to_string(), create_if_missing: true }).unwrap();
        let ledger = Ledger::new(&store, params);
        let elections = ElectionsTable::new();
        let processor = BlockProcessor::new();

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - 10),
            link: Hash([9u8; HASH_LEN]),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);

        let dest_key = keypair();
        let dest_account = Account(dest_key.verifying_key().to_bytes());
        let mut open = StateBlock {
            account: dest_account,
            creation_time: ShortTimestamp(11),
            previous: Hash::ZERO,
            representative: dest_account,
            balance: Amount(10),
            link: send.hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        open.sign(&dest_key);

        // Submit the receive before its send exists: it must gap on `link`.
        processor.enqueue(open, Instant::now());
        let events = processor.flush(&ledger, &elections).unwrap();
        assert_eq!(events, vec![ProcessorEvent::Gapped(open.hash())]);
        assert_eq!(processor.gap_cache_len(), 1);

        // Now the send arrives; admitting it must resubmit the parked open.
        processor.enqueue(send, Instant::now());
        let events = processor.flush(&ledger, &elections).unwrap();
        assert!(events.contains(&ProcessorEvent::Progress(send.hash())));
        assert!(events.contains(&ProcessorEvent::Progress(open.hash())));
        assert_eq!(processor.gap_cache_len(), 0);
    }

    #[test]
    fn gapped_block_is_persisted_and_drained_from_unchecked() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = Store::open(&StoreConfig { path: tmp.path().to_string_lossy().to_string(), create_if_missing: true }).unwrap();
        let ledger = Ledger::new(&store, params);
        let elections = ElectionsTable::new();
        let processor = BlockProcessor::new();

        let genesis = signed_genesis(&params, &genesis_key);
        ledger.ensure_genesis(&genesis).unwrap();

        let mut send = StateBlock {
            account: params.genesis_account,
            creation_time: ShortTimestamp(10),
            previous: genesis.hash(),
            representative: params.genesis_account,
            balance: Amount(params.genesis_amount.0 - 10),
            link: Hash([9u8; HASH_LEN]),
            signature: Signature::ZERO,
            work: Work(0),
        };
        send.sign(&genesis_key);

        let dest_key = keypair();
        let dest_account = Account(dest_key.verifying_key().to_bytes());
        let mut open = StateBlock {
            account: dest_account,
            creation_time: ShortTimestamp(11),
            previous: Hash::ZERO,
            representative: dest_account,
            balance: Amount(10),
            link: send.hash(),
            signature: Signature::ZERO,
            work: Work(0),
        };
        open.sign(&dest_key);

        processor.enqueue(open, Instant::now());
        processor.flush(&ledger, &elections).unwrap();

        // The gap must be visible in the persisted `unchecked` table, not
        // just in process memory.
        let txn = store.begin_read();
        let persisted = txn.unchecked_all().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].0, send.hash());
        assert_eq!(persisted[0].1, vec![open]);
        drop(txn);

        // A fresh processor built against the same store rehydrates the
        // gap cache from disk, so it still resubmits `open` once `send`
        // arrives, even though the first processor never saw it.
        let reloaded = BlockProcessor::new();
        reloaded.load_unchecked(&store).unwrap();
        assert_eq!(reloaded.gap_cache_len(), 1);

        reloaded.enqueue(send, Instant::now());
        let events = reloaded.flush(&ledger, &elections).unwrap();
        assert!(events.contains(&ProcessorEvent::Progress(send.hash())));
        assert!(events.contains(&ProcessorEvent::Progress(open.hash())));
        assert_eq!(reloaded.gap_cache_len(), 0);

        let txn = store.begin_read();
        assert!(txn.unchecked_all().unwrap().is_empty());
    }

    #[test]
    fn fork_starts_an_election() {
        let tmp = TempDir::new().unwrap();
        let mut params = NetworkParams::test();
        let genesis_key = keypair();
        params.genesis_account = Account(genesis_key.verifying_key().to_bytes());
        let store = Store::open(&StoreConfig { path: tmp.path().to_string_lossy().to_string(), create_if_missing: true }).unwrap();
        let ledger = Ledger::new(&store, params);
        let elections = ElectionsTable::new();
        let processor = BlockProcessor::new();

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

        processor.enqueue(send_a, Instant::now());
        processor.flush(&ledger, &elections).unwrap();
        processor.enqueue(send_b, Instant::now());
        let events = processor.flush(&ledger, &elections).unwrap();
        assert_eq!(events, vec![ProcessorEvent::ForkDetected(send_b.hash())]);
        assert!(elections.has_election(genesis.hash()));
    }
}
