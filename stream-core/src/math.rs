//! Settle-on-touch streaming math
//!
//! Pure functions over copies of payer and stream state. Every mutating ledger
//! operation starts by running these against the current timestamp, then
//! commits the results only if the whole operation succeeds.
//!
//! A payer is settled as a unit: all of their streams draw from one balance
//! at `total_rate`. If the balance cannot cover the full elapsed time, the
//! payer is funded for as many whole seconds as it can pay for and the
//! remainder (less than `total_rate`) stays in the balance. Time past that
//! point is debt and accrues nothing until a later deposit is settled.

use crate::types::{PayerState, Stream};

/// Outcome of settling a payer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayerSettlement {
    /// Payer state after settlement
    pub payer: PayerState,

    /// Instant up to which all of the payer's streams are funded
    pub paid_until: u64,
}

impl PayerSettlement {
    /// True when the payer could not fund every second up to `now`
    pub fn is_exhausted(&self, now: u64) -> bool {
        self.paid_until < now
    }
}

/// Settle a payer's aggregate obligation up to `now`
pub fn settle_payer(payer: &PayerState, now: u64) -> PayerSettlement {
    let mut settled = *payer;

    // A clock behind the cursor never moves it backwards
    if now <= payer.last_update {
        return PayerSettlement {
            payer: settled,
            paid_until: payer.last_update,
        };
    }

    let elapsed = u128::from(now - payer.last_update);
    let obligation = elapsed.saturating_mul(payer.total_rate);

    if payer.balance >= obligation {
        settled.balance = payer.balance - obligation;
        settled.last_update = now;
    } else {
        // obligation > balance implies total_rate > 0
        let funded_secs = payer.balance / payer.total_rate;
        settled.balance = payer.balance % payer.total_rate;
        // funded_secs < elapsed, so the cast cannot truncate
        settled.last_update = payer.last_update + funded_secs as u64;
    }

    PayerSettlement {
        paid_until: settled.last_update,
        payer: settled,
    }
}

/// Credit a stream with its share of an already-debited payer settlement
pub fn settle_stream(stream: &Stream, paid_until: u64) -> Stream {
    let mut settled = stream.clone();
    if paid_until > stream.last_update {
        let elapsed = u128::from(paid_until - stream.last_update);
        settled.accrued = stream
            .accrued
            .saturating_add(elapsed.saturating_mul(stream.rate));
        settled.last_update = paid_until;
    }
    settled
}

/// Value debited from the payer but not yet credited to the stream
pub fn reserved_for_stream(stream: &Stream, payer: &PayerState) -> u128 {
    u128::from(payer.last_update.saturating_sub(stream.last_update)).saturating_mul(stream.rate)
}

/// Unfunded accrual between `paid_until` and `now` at `rate`
pub fn unfunded(rate: u128, paid_until: u64, now: u64) -> u128 {
    u128::from(now.saturating_sub(paid_until)).saturating_mul(rate)
}

/// Payer balance net of unsettled obligations, negative when in debt
pub fn net_balance(payer: &PayerState, now: u64) -> i128 {
    let elapsed = u128::from(now.saturating_sub(payer.last_update));
    let obligation = elapsed.saturating_mul(payer.total_rate);
    saturating_i128(payer.balance) - saturating_i128(obligation)
}

fn saturating_i128(value: u128) -> i128 {
    i128::try_from(value).unwrap_or(i128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, StreamId};

    fn payer(balance: u128, total_rate: u128, last_update: u64) -> PayerState {
        PayerState {
            balance,
            total_rate,
            last_update,
        }
    }

    fn stream(rate: u128, last_update: u64) -> Stream {
        Stream {
            id: StreamId::from_bytes([1u8; 32]),
            payer: Address::from_low_u64(1),
            payee: Address::from_low_u64(2),
            rate,
            nonce: 0,
            created_at: last_update,
            last_update,
            accrued: 0,
        }
    }

    #[test]
    fn test_settle_fully_funded() {
        let settlement = settle_payer(&payer(1_000, 10, 0), 50);
        assert_eq!(settlement.paid_until, 50);
        assert_eq!(settlement.payer.balance, 500);
        assert!(!settlement.is_exhausted(50));
    }

    #[test]
    fn test_settle_exhausted() {
        let settlement = settle_payer(&payer(1_005, 10, 0), 150);
        assert_eq!(settlement.paid_until, 100);
        assert_eq!(settlement.payer.balance, 5);
        assert!(settlement.is_exhausted(150));
    }

    #[test]
    fn test_settle_no_streams() {
        let settlement = settle_payer(&payer(1_000, 0, 0), 1_000_000);
        assert_eq!(settlement.paid_until, 1_000_000);
        assert_eq!(settlement.payer.balance, 1_000);
    }

    #[test]
    fn test_settle_twice_is_idempotent() {
        let once = settle_payer(&payer(1_000, 7, 3), 90);
        let twice = settle_payer(&once.payer, 90);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_settle_clock_behind_cursor() {
        let state = payer(1_000, 10, 100);
        let settlement = settle_payer(&state, 40);
        assert_eq!(settlement.payer, state);
        assert_eq!(settlement.paid_until, 100);
    }

    #[test]
    fn test_settle_huge_obligation_saturates() {
        let settlement = settle_payer(&payer(10, u128::MAX / 2, 0), u64::MAX);
        assert_eq!(settlement.paid_until, 0);
        assert_eq!(settlement.payer.balance, 10);
    }

    #[test]
    fn test_split_settlement_matches_single() {
        // Settling at t1 then depositing equals depositing then settling once
        let start = payer(1_234, 10, 0);
        let early = settle_payer(&start, 200);
        let mut topped_up = early.payer;
        topped_up.balance += 3_000;
        let split = settle_payer(&topped_up, 400);

        let mut direct = start;
        direct.balance += 3_000;
        let single = settle_payer(&direct, 400);

        assert_eq!(split, single);
    }

    #[test]
    fn test_settle_stream_credits_elapsed() {
        let settled = settle_stream(&stream(10, 20), 70);
        assert_eq!(settled.accrued, 500);
        assert_eq!(settled.last_update, 70);

        // Cursor never moves backwards
        let unchanged = settle_stream(&settled, 60);
        assert_eq!(unchanged, settled);
    }

    #[test]
    fn test_reserved_and_unfunded() {
        let s = stream(10, 20);
        assert_eq!(reserved_for_stream(&s, &payer(0, 10, 50)), 300);
        assert_eq!(unfunded(10, 50, 80), 300);
        assert_eq!(unfunded(10, 80, 50), 0);
    }

    #[test]
    fn test_net_balance_goes_negative() {
        assert_eq!(net_balance(&payer(100, 10, 0), 5), 50);
        assert_eq!(net_balance(&payer(100, 10, 0), 15), -50);
    }
}
