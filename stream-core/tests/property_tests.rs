//! Property-based tests for ledger and registry invariants
//!
//! These tests use proptest to verify:
//! - Solvency: holdings always cover payer balances and accrued streams
//! - Bounded payouts: a payee never receives more than rate × active time
//! - Atomicity: a failed operation changes nothing
//! - Idempotency: settling twice without elapsed time is a no-op
//! - Deterministic, collision-free ledger addresses

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stream_core::{
    crypto::derive_ledger_address, math, Address, Event, Ledger, ManualClock, PayerState,
    Stream, StreamId, Token,
};

const PAYERS: u64 = 3;
const PAYEES: u64 = 3;

#[derive(Debug, Clone)]
enum Op {
    Deposit { payer: u64, amount: u128 },
    Create { payer: u64, payee: u64, rate: u128 },
    DepositAndCreate { payer: u64, amount: u128, payee: u64, rate: u128 },
    Withdraw { stream: usize, amount: u128 },
    WithdrawAll { stream: usize },
    Cancel { stream: usize },
    Modify { stream: usize, payee: u64, rate: u128 },
    WithdrawDeposit { payer: u64, amount: u128 },
    WithdrawDepositAll { payer: u64 },
    Advance { secs: u64 },
}

/// Strategy for generating ledger operations
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..PAYERS, 0u128..100_000).prop_map(|(payer, amount)| Op::Deposit { payer, amount }),
        (0..PAYERS, 0..PAYEES, 0u128..5_000)
            .prop_map(|(payer, payee, rate)| Op::Create { payer, payee, rate }),
        (0..PAYERS, 0u128..100_000, 0..PAYEES, 1u128..5_000).prop_map(
            |(payer, amount, payee, rate)| Op::DepositAndCreate { payer, amount, payee, rate }
        ),
        (any::<usize>(), 0u128..5_000).prop_map(|(stream, amount)| Op::Withdraw { stream, amount }),
        any::<usize>().prop_map(|stream| Op::WithdrawAll { stream }),
        any::<usize>().prop_map(|stream| Op::Cancel { stream }),
        (any::<usize>(), 0..PAYEES, 1u128..5_000)
            .prop_map(|(stream, payee, rate)| Op::Modify { stream, payee, rate }),
        (0..PAYERS, 0u128..50_000)
            .prop_map(|(payer, amount)| Op::WithdrawDeposit { payer, amount }),
        (0..PAYERS).prop_map(|payer| Op::WithdrawDepositAll { payer }),
        (0u64..500).prop_map(|secs| Op::Advance { secs }),
    ]
}

fn payer(i: u64) -> Address {
    Address::from_low_u64(0x1000 + i)
}

fn payee(i: u64) -> Address {
    Address::from_low_u64(0x2000 + i)
}

/// Observable state used to check that failed operations are no-ops
#[derive(Debug, PartialEq)]
struct Snapshot {
    holdings: u128,
    events: usize,
    payers: Vec<PayerState>,
    streams: Vec<Option<Stream>>,
}

fn snapshot(ledger: &Ledger, ids: &[StreamId]) -> Snapshot {
    Snapshot {
        holdings: ledger.holdings(),
        events: ledger.events().len(),
        payers: (0..PAYERS).map(|i| ledger.payer(&payer(i))).collect(),
        streams: ids.iter().map(|id| ledger.stream(id).cloned()).collect(),
    }
}

fn pick(ids: &[StreamId], index: usize) -> StreamId {
    if ids.is_empty() {
        StreamId::from_bytes([0xEE; 32])
    } else {
        ids[index % ids.len()]
    }
}

/// Apply an operation, ignoring its output but reporting success
fn apply(ledger: &mut Ledger, clock: &ManualClock, ids: &mut Vec<StreamId>, op: &Op) -> bool {
    match *op {
        Op::Deposit { payer: p, amount } => ledger.deposit(payer(p), amount).is_ok(),
        Op::Create {
            payer: p,
            payee: q,
            rate,
        } => match ledger.create_stream(payer(p), payee(q), rate) {
            Ok(id) => {
                ids.push(id);
                true
            }
            Err(_) => false,
        },
        Op::DepositAndCreate { payer: p, amount, payee: q, rate } => {
            match ledger.deposit_and_create(payer(p), amount, payee(q), rate) {
                Ok(id) => {
                    ids.push(id);
                    true
                }
                Err(_) => false,
            }
        }
        Op::Withdraw { stream, amount } => ledger.withdraw(pick(ids, stream), amount).is_ok(),
        Op::WithdrawAll { stream } => ledger.withdraw_all(pick(ids, stream)).is_ok(),
        Op::Cancel { stream } => ledger.cancel_stream(pick(ids, stream)).is_ok(),
        Op::Modify {
            stream,
            payee: q,
            rate,
        } => match ledger.modify_stream(pick(ids, stream), payee(q), rate) {
            Ok(id) => {
                ids.push(id);
                true
            }
            Err(_) => false,
        },
        Op::WithdrawDeposit { payer: p, amount } => {
            ledger.withdraw_deposit(payer(p), amount).is_ok()
        }
        Op::WithdrawDepositAll { payer: p } => ledger.withdraw_deposit_all(payer(p)).is_ok(),
        Op::Advance { secs } => {
            clock.advance(secs);
            true
        }
    }
}

fn create_ledger(decimals: u8) -> (Ledger, ManualClock) {
    let clock = ManualClock::new(10_000);
    let token = Token::new(Address::from_low_u64(0xC0FFEE), decimals);
    let ledger = Ledger::new(
        token,
        Address::from_low_u64(0xBEEF),
        Arc::new(clock.clone()),
        None,
    )
    .unwrap();
    (ledger, clock)
}

proptest! {
    /// Property: the ledger stays solvent and failed operations leave no trace
    #[test]
    fn prop_solvent_and_atomic(
        decimals in prop_oneof![Just(20u8), Just(18u8)],
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let (mut ledger, clock) = create_ledger(decimals);
        let mut ids = Vec::new();

        for op in &ops {
            let before = snapshot(&ledger, &ids);
            let ok = apply(&mut ledger, &clock, &mut ids, op);
            if !ok {
                prop_assert_eq!(&snapshot(&ledger, &ids), &before);
            }
            prop_assert!(ledger.check_solvency().is_ok(), "insolvent after {:?}", op);
        }
    }

    /// Property: total paid to a stream never exceeds rate × active time
    #[test]
    fn prop_payouts_bounded_by_rate(
        decimals in prop_oneof![Just(20u8), Just(18u8)],
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let (mut ledger, clock) = create_ledger(decimals);
        let divisor = Token::new(Address::ZERO, decimals).divisor().unwrap();
        let mut ids = Vec::new();
        for op in &ops {
            apply(&mut ledger, &clock, &mut ids, op);
        }

        // (opened at, rate, paid so far) per live stream
        let mut open: HashMap<StreamId, (u64, u128, u128)> = HashMap::new();
        let bound = |opened: u64, rate: u128, closed: u64| {
            u128::from(closed - opened) * rate / divisor
        };

        for record in ledger.events() {
            match &record.event {
                Event::StreamCreated { stream_id, rate, .. } => {
                    open.insert(*stream_id, (record.timestamp, *rate, 0));
                }
                Event::Withdraw { stream_id, amount, .. } => {
                    let entry = open.get_mut(stream_id).unwrap();
                    entry.2 += amount;
                    prop_assert!(entry.2 <= bound(entry.0, entry.1, record.timestamp));
                }
                Event::StreamCancelled { stream_id, payout, .. } => {
                    let (opened, rate, paid) = open.remove(stream_id).unwrap();
                    prop_assert!(paid + payout <= bound(opened, rate, record.timestamp));
                }
                _ => {}
            }
        }
    }

    /// Property: settling twice at the same instant changes nothing
    #[test]
    fn prop_settlement_idempotent(
        balance in 0u128..1_000_000_000,
        total_rate in 0u128..1_000_000,
        last_update in 0u64..1_000_000,
        elapsed in 0u64..1_000_000,
    ) {
        let state = PayerState { balance, total_rate, last_update };
        let now = last_update + elapsed;

        let once = math::settle_payer(&state, now);
        let twice = math::settle_payer(&once.payer, now);
        prop_assert_eq!(once, twice);
        prop_assert!(once.paid_until <= now);
        prop_assert!(once.payer.balance <= balance);
    }

    /// Property: address derivation is deterministic
    #[test]
    fn prop_derivation_deterministic(registry in any::<[u8; 20]>(), token in any::<[u8; 20]>()) {
        let registry = Address::from_bytes(registry);
        let token = Address::from_bytes(token);
        prop_assert_eq!(
            derive_ledger_address(&registry, &token),
            derive_ledger_address(&registry, &token)
        );
    }

    /// Property: distinct tokens get distinct ledger addresses
    #[test]
    fn prop_derivation_distinct(tokens in prop::collection::hash_set(any::<[u8; 20]>(), 2..64)) {
        let registry = Address::from_low_u64(0xFAC);
        let addresses: HashSet<Address> = tokens
            .iter()
            .map(|t| derive_ledger_address(&registry, &Address::from_bytes(*t)))
            .collect();
        prop_assert_eq!(addresses.len(), tokens.len());
    }
}
