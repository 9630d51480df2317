//! Active elections and stake-weighted tallying (C10, §4.10).
//!
//! An election is indexed by `root` (GLOSSARY: `previous` for non-opens,
//! `account` for opens). It tracks every competing block seen for that
//! root, the last vote observed from each representative, and a running
//! stake-weighted tally. Confirmation fires once the current winner's
//! tally exceeds the quorum threshold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::block::StateBlock;
use crate::numbers::{Account, Amount, Hash};
use crate::vote::Vote;

/// A representative's vote is re-emitted at most once per this interval
/// per election (§4.10 "Cooldown").
pub const VOTE_COOLDOWN: Duration = Duration::from_secs(15);

/// Size of the bounded ring of recently confirmed roots (§4.10 "push the
/// winner onto a bounded ring").
pub const CONFIRMED_RING_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug)]
pub struct LastVote {
    pub hash: Hash,
    pub sequence: u64,
    pub time: Instant,
}

/// Per-root election state.
pub struct Election {
    pub root: Hash,
    /// Every competing block seen for this root, keyed by hash.
    candidates: HashMap<Hash, StateBlock>,
    /// Most recent vote observed from each representative account.
    pub last_votes: HashMap<Account, LastVote>,
    /// Stake-weighted tally per competing block hash.
    tally: HashMap<Hash, Amount>,
    pub confirmed: bool,
}

impl Election {
    pub fn new(root: Hash, initial: StateBlock) -> Self {
        let mut candidates = HashMap::new();
        candidates.insert(initial.hash(), initial);
        Election {
            root,
            candidates,
            last_votes: HashMap::new(),
            tally: HashMap::new(),
            confirmed: false,
        }
    }

    /// Registers another competing block for this root (a fork).
    pub fn insert_candidate(&mut self, block: StateBlock) {
        self.candidates.entry(block.hash()).or_insert(block);
    }

    pub fn candidate(&self, hash: Hash) -> Option<&StateBlock> {
        self.candidates.get(&hash)
    }

    /// Current winner: the candidate hash with the highest tally. Ties
    /// break toward the lexicographically smaller hash for determinism.
    pub fn winner(&self) -> Option<Hash> {
        self.candidates
            .keys()
            .max_by(|a, b| {
                let ta = self.tally.get(*a).copied().unwrap_or(Amount::ZERO);
                let tb = self.tally.get(*b).copied().unwrap_or(Amount::ZERO);
                ta.cmp(&tb).then_with(|| b.cmp(a))
            })
            .copied()
    }

    pub fn tally_for(&self, hash: Hash) -> Amount {
        self.tally.get(&hash).copied().unwrap_or(Amount::ZERO)
    }

    /// Applies a vote: updates `last_votes` (sequence-ordered, same rule
    /// as the `vote` table) for every representative, then retallies.
    /// `weight_of` resolves a representative account to its current
    /// delegated stake.
    pub fn apply_vote(&mut self, vote: &Vote, weight_of: impl Fn(Account) -> Amount) {
        let hashes = vote.hashes();
        let primary = match hashes.first() {
            Some(h) => *h,
            None => return,
        };

        if let Some(existing) = self.last_votes.get(&vote.account) {
            if existing.sequence >= vote.sequence {
                return;
            }
        }
        self.last_votes.insert(
            vote.account,
            LastVote { hash: primary, sequence: vote.sequence, time: Instant::now() },
        );

        self.retally(weight_of);
    }

    /// Recomputes every candidate's tally from scratch off `last_votes`.
    /// Cheap enough for this scale (elections have at most a handful of
    /// competing blocks and representatives); avoids tracking incremental
    /// deltas through vote supersession.
    fn retally(&mut self, weight_of: impl Fn(Account) -> Amount) {
        let mut tally: HashMap<Hash, Amount> = HashMap::new();
        for (representative, last_vote) in &self.last_votes {
            if !self.candidates.contains_key(&last_vote.hash) {
                continue;
            }
            let weight = weight_of(*representative);
            let entry = tally.entry(last_vote.hash).or_insert(Amount::ZERO);
            *entry = Amount(entry.0.saturating_add(weight.0));
        }
        self.tally = tally;
    }

    /// Whether a representative's vote may be re-emitted yet (§4.10
    /// cooldown).
    pub fn cooldown_elapsed(&self, representative: Account) -> bool {
        match self.last_votes.get(&representative) {
            Some(v) => v.time.elapsed() >= VOTE_COOLDOWN,
            None => true,
        }
    }

    /// Confirms if `winner`'s tally strictly exceeds `quorum` (§4.10
    /// "`tally(winner) > quorum_threshold`").
    pub fn try_confirm(&mut self, quorum: Amount) -> Option<Hash> {
        let winner = self.winner()?;
        if self.tally_for(winner).0 > quorum.0 {
            self.confirmed = true;
            Some(winner)
        } else {
            None
        }
    }
}

/// Thread-safe map of active elections, keyed by root (§5 "the peer table
/// and elections map are guarded by fine-grained mutexes").
#[derive(Default)]
pub struct ElectionsTable {
    elections: Mutex<HashMap<Hash, Election>>,
    confirmed_ring: Mutex<Vec<Hash>>,
}

impl ElectionsTable {
    pub fn new() -> Self {
        ElectionsTable { elections: Mutex::new(HashMap::new()), confirmed_ring: Mutex::new(Vec::new()) }
    }

    /// Starts a new election for `block`'s root, or registers `block` as
    /// an additional competitor if one is already underway (§4.9 "On
    /// `fork`: start or update an active election for the root").
    pub fn start_or_update(&self, block: StateBlock) {
        let root = block.root();
        let mut elections = self.elections.lock();
        elections
            .entry(root)
            .and_modify(|e| e.insert_candidate(block))
            .or_insert_with(|| Election::new(root, block));
    }

    pub fn has_election(&self, root: Hash) -> bool {
        self.elections.lock().contains_key(&root)
    }

    /// Applies an incoming vote to every election referencing any hash it
    /// opines on (§4.10 "update `last_votes` for every active election
    /// referencing any hash in the vote").
    pub fn apply_vote(&self, vote: &Vote, weight_of: impl Fn(Account) -> Amount + Copy) {
        let hashes = vote.hashes();
        let mut elections = self.elections.lock();
        for election in elections.values_mut() {
            if hashes.iter().any(|h| election.candidate(*h).is_some()) {
                election.apply_vote(vote, weight_of);
            }
        }
    }

    /// Sweeps every active, unconfirmed election and confirms any whose
    /// winner clears `quorum`. Returns the set of newly confirmed
    /// `(root, winner)` pairs; confirmed elections are removed from the
    /// active map and the winner is pushed onto the bounded ring.
    pub fn sweep_confirmations(&self, quorum: Amount) -> Vec<(Hash, Hash)> {
        let mut elections = self.elections.lock();
        let mut confirmed = Vec::new();
        elections.retain(|root, election| {
            if let Some(winner) = election.try_confirm(quorum) {
                confirmed.push((*root, winner));
                false
            } else {
                true
            }
        });
        drop(elections);

        if !confirmed.is_empty() {
            let mut ring = self.confirmed_ring.lock();
            for (_, winner) in &confirmed {
                if ring.len() >= CONFIRMED_RING_CAPACITY {
                    ring.remove(0);
                }
                ring.push(*winner);
            }
        }
        confirmed
    }

    pub fn active_root_count(&self) -> usize {
        self.elections.lock().len()
    }

    pub fn recently_confirmed(&self) -> Vec<Hash> {
        self.confirmed_ring.lock().clone()
    }
}
