//! Network-selected constants (§9 "Global mutable state").
//!
//! The original node keeps magic numbers, epoch origins, manna constants,
//! and the genesis account behind a compile-time network selector. Here
//! they are fields of an immutable [`NetworkParams`] value, constructed
//! once at node start-up and passed by reference to every component that
//! needs them (the ledger, the manna controller, the wire codec).

use crate::numbers::{Account, Amount, ShortTimestamp};

/// Which of the three standard networks a node is running on. Each carries
/// its own wire magic, manna cadence, and genesis account.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum NetworkKind {
    Test,
    Beta,
    Live,
}

/// Wire-header magic bytes (§4.6), keyed by network.
impl NetworkKind {
    pub fn magic(&self) -> [u8; 2] {
        match self {
            NetworkKind::Test => *b"MT",
            NetworkKind::Beta => *b"MB",
            NetworkKind::Live => *b"MI",
        }
    }
}

/// Current protocol version understood by this implementation, and the
/// inclusive `[version_min, version_max]` range it will negotiate with
/// peers (§4.6 header bytes 2..5).
pub const PROTOCOL_VERSION: u8 = 0x12;
pub const PROTOCOL_VERSION_MIN: u8 = 0x10;
pub const PROTOCOL_VERSION_MAX: u8 = 0x12;

/// Immutable, network-scoped constants consulted throughout the node.
///
/// Everything in here is a *parameter*, never global mutable state: every
/// call site that needs a network constant takes `&NetworkParams` rather
/// than reading a `static`.
#[derive(Clone, Copy, Debug)]
pub struct NetworkParams {
    pub kind: NetworkKind,

    /// The one account the chain treats specially: its first block must be
    /// `open_genesis`, and it is the sole target of the "no source" gap
    /// rule in ledger admission step 5.
    pub genesis_account: Account,
    /// Balance of the canonical genesis block, used by test scenario 1
    /// (§8) and by store bring-up.
    pub genesis_amount: Amount,

    /// The one account whose balance comparisons run through
    /// [`crate::manna::manna_adjust`] (§4.5) instead of being read
    /// verbatim from storage.
    pub manna_account: Account,
    /// `F`: seconds between manna ticks.
    pub manna_frequency_secs: u64,
    /// `I`: balance units credited (or, running backwards, debited) per
    /// tick.
    pub manna_increment_per_tick: u64,
    /// `S`: the earliest time manna accrues from.
    pub manna_start_time: ShortTimestamp,

    /// `epoch2` (§3.2), the boundary the send-to-self prohibition and
    /// comment-block admission are keyed on.
    pub epoch2: ShortTimestamp,
}

impl NetworkParams {
    pub fn magic(&self) -> [u8; 2] {
        self.kind.magic()
    }

    /// Fast manna cadence, deterministic small genesis account — suitable
    /// for unit and integration tests (§4.5's own example uses `F=4s`).
    pub fn test() -> Self {
        NetworkParams {
            kind: NetworkKind::Test,
            genesis_account: Account([0xA1; 32]),
            genesis_amount: Amount(100_000_000),
            manna_account: Account([0xA2; 32]),
            manna_frequency_secs: 4,
            manna_increment_per_tick: 1_000,
            manna_start_time: ShortTimestamp::ZERO,
            epoch2: ShortTimestamp::epoch2(),
        }
    }

    /// Beta network: same shape as live but with a distinct magic and a
    /// shorter manna cadence for faster soak testing.
    pub fn beta() -> Self {
        NetworkParams {
            kind: NetworkKind::Beta,
            genesis_account: Account([0xB1; 32]),
            genesis_amount: Amount(u64::MAX / 3),
            manna_account: Account([0xB2; 32]),
            manna_frequency_secs: 3_600,
            manna_increment_per_tick: 1_000_000,
            manna_start_time: ShortTimestamp::ZERO,
            epoch2: ShortTimestamp::epoch2(),
        }
    }

    /// Live network cadence: one manna tick per day.
    pub fn live() -> Self {
        NetworkParams {
            kind: NetworkKind::Live,
            genesis_account: Account([0xC1; 32]),
            genesis_amount: Amount(u64::MAX / 4),
            manna_account: Account([0xC2; 32]),
            manna_frequency_secs: 86_400,
            manna_increment_per_tick: 1_000_000,
            manna_start_time: ShortTimestamp::ZERO,
            epoch2: ShortTimestamp::epoch2(),
        }
    }

    pub fn by_kind(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Test => Self::test(),
            NetworkKind::Beta => Self::beta(),
            NetworkKind::Live => Self::live(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_match_expected_values() {
        assert_eq!(NetworkKind::Test.magic(), *b"MT");
        assert_eq!(NetworkKind::Beta.magic(), *b"MB");
        assert_eq!(NetworkKind::Live.magic(), *b"MI");
    }

    #[test]
    fn networks_have_distinct_genesis_accounts() {
        let t = NetworkParams::test();
        let b = NetworkParams::beta();
        let l = NetworkParams::live();
        assert_ne!(t.genesis_account, b.genesis_account);
        assert_ne!(b.genesis_account, l.genesis_account);
    }
}
