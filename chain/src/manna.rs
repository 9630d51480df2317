//! Manna controller (C5): a pure balance-adjustment function for the one
//! distinguished account whose effective balance is a function of
//! wall-clock time rather than of stored state alone (§4.5).
//!
//! `manna_adjust` never touches storage and never fails; it is applied
//! only when comparing the manna account's balance across two points in
//! time (see [`crate::block::StateBlock::balance_manna_adj`]). The stored
//! head balance of the manna account is always the raw value as of
//! `head.creation_time` — manna is never "settled" into storage.

use crate::network::NetworkParams;
use crate::numbers::{Amount, ShortTimestamp};

/// `manna_adjust(balance, t_from, t_to)` (§4.5).
///
/// Ticks are counted in whole `F`-second buckets since [`NetworkParams::manna_start_time`]
/// (`S`); each elapsed tick between `t_from` and `t_to` credits (or, running
/// backwards in time, debits) `I` balance units.
///
/// Going forward in time (`t_from <= t_to`) credits are added; going
/// backward (used by rollback and by comparing a later `prev` against an
/// earlier candidate block) debits are subtracted, saturating at zero
/// rather than underflowing.
pub fn manna_adjust(
    balance: Amount,
    t_from: ShortTimestamp,
    t_to: ShortTimestamp,
    params: &NetworkParams,
) -> Amount {
    let freq = params.manna_frequency_secs.max(1);
    let start = params.manna_start_time;

    if t_from.0 <= t_to.0 {
        let ticks = ticks_elapsed(t_from, t_to, start, freq);
        Amount(balance.0.saturating_add(ticks.saturating_mul(params.manna_increment_per_tick)))
    } else {
        let ticks = ticks_elapsed(t_to, t_from, start, freq);
        Amount(balance.0.saturating_sub(ticks.saturating_mul(params.manna_increment_per_tick)))
    }
}

/// Number of whole `F`-second ticks between `lo` and `hi` (`lo <= hi`),
/// each clamped forward to `start` before bucketing — matches
/// `a = max(t_from, S)/F`, `b = t_to/F`, ticks = `b - a`.
fn ticks_elapsed(lo: ShortTimestamp, hi: ShortTimestamp, start: ShortTimestamp, freq: u64) -> u64 {
    let a = lo.0.max(start.0) as u64 / freq;
    let b = hi.0 as u64 / freq;
    b.saturating_sub(a)
}

/// `account_balance_with_manna(M, t)` (§8 testable property 6): the manna
/// account's effective balance at time `t`, given its current head
/// balance and the head's creation time.
pub fn account_balance_with_manna(
    head_balance: Amount,
    head_creation_time: ShortTimestamp,
    t: ShortTimestamp,
    params: &NetworkParams,
) -> Amount {
    manna_adjust(head_balance, head_creation_time, t, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manna_accrual_over_many_ticks() {
        // Manna account M opened at T0 with balance 100_000_000. At
        // T0+600s with F=4, I=1000, expect +150*1000.
        let params = NetworkParams {
            manna_frequency_secs: 4,
            manna_increment_per_tick: 1_000,
            manna_start_time: ShortTimestamp::ZERO,
            ..NetworkParams::test()
        };
        let t0 = ShortTimestamp(1_000_000);
        let balance = Amount(100_000_000);
        let t1 = t0 + 600;
        let adjusted = manna_adjust(balance, t0, t1, &params);
        assert_eq!(adjusted, Amount(100_000_000 + 150 * 1_000));
    }

    #[test]
    fn manna_adjust_is_symmetric_forward_and_backward() {
        let params = NetworkParams::test();
        let t0 = ShortTimestamp(100);
        let t1 = ShortTimestamp(100 + params.manna_frequency_secs as u32 * 20);
        let forward = manna_adjust(Amount(5_000), t0, t1, &params);
        let back = manna_adjust(forward, t1, t0, &params);
        assert_eq!(back, Amount(5_000));
    }

    #[test]
    fn manna_adjust_backward_saturates_at_zero() {
        let params = NetworkParams::test();
        let t0 = ShortTimestamp(0);
        let t1 = ShortTimestamp(params.manna_frequency_secs as u32 * 1_000);
        let tiny = Amount(1);
        let back = manna_adjust(tiny, t1, t0, &params);
        assert_eq!(back, Amount::ZERO);
    }

    #[test]
    fn manna_adjust_before_start_time_does_not_accrue() {
        let params = NetworkParams {
            manna_start_time: ShortTimestamp(1_000),
            ..NetworkParams::test()
        };
        // Both timestamps are before `S`; no ticks should register even
        // though t_to > t_from.
        let adjusted = manna_adjust(Amount(10), ShortTimestamp(0), ShortTimestamp(500), &params);
        assert_eq!(adjusted, Amount(10));
    }

    #[test]
    fn manna_adjust_no_op_when_times_equal() {
        let params = NetworkParams::test();
        let t = ShortTimestamp(12345);
        assert_eq!(manna_adjust(Amount(77), t, t, &params), Amount(77));
    }
}
