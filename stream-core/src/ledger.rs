//! Streaming ledger for a single token
//!
//! Holds payer deposits and active streams and settles accrual lazily: every
//! operation reads the clock once, settles the touched payer (and stream)
//! against that instant, then applies its own effect.
//!
//! # Atomicity
//!
//! Operations work on copies of the touched payer and stream state. Nothing
//! is written back until every check has passed, so a failed operation leaves
//! the ledger exactly as it found it, settlement included.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stream_core::{Address, Ledger, ManualClock, Token};
//!
//! let clock = ManualClock::new(0);
//! let token = Token::new(Address::from_low_u64(1), 20);
//! let mut ledger = Ledger::new(token, Address::from_low_u64(2), Arc::new(clock.clone()), None)?;
//!
//! let (payer, payee) = (Address::from_low_u64(10), Address::from_low_u64(11));
//! ledger.deposit(payer, 1_000)?;
//! let stream_id = ledger.create_stream(payer, payee, 10)?;
//!
//! clock.advance(50);
//! ledger.withdraw(stream_id, 500)?;
//! # Ok::<(), stream_core::Error>(())
//! ```

use crate::{
    clock::Clock,
    crypto::derive_stream_id,
    events::{Event, EventLog, EventRecord},
    math::{self, PayerSettlement},
    types::{AccountId, Address, PayerState, Stream, StreamId, Token, Withdrawable},
    Error, Result,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Per-token streaming ledger
pub struct Ledger {
    /// Token this ledger accounts for
    token: Token,

    /// Ledger address (as predicted by the registry)
    address: Address,

    /// Base units to internal precision
    divisor: u128,

    /// Payer accounting state
    payers: HashMap<AccountId, PayerState>,

    /// Active streams
    streams: HashMap<StreamId, Stream>,

    /// Base units held on behalf of payers and payees
    holdings: u128,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Journal of committed transitions
    events: EventLog,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("token", &self.token)
            .field("address", &self.address)
            .field("payers", &self.payers.len())
            .field("streams", &self.streams.len())
            .field("holdings", &self.holdings)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Create an empty ledger
    ///
    /// Fails with [`Error::UnsupportedDecimals`] for tokens above 20 decimals.
    pub fn new(
        token: Token,
        address: Address,
        clock: Arc<dyn Clock>,
        sink: Option<broadcast::Sender<EventRecord>>,
    ) -> Result<Self> {
        let divisor = token.divisor()?;

        Ok(Self {
            token,
            address,
            divisor,
            payers: HashMap::new(),
            streams: HashMap::new(),
            holdings: 0,
            clock,
            events: EventLog::new(token.address, sink),
        })
    }

    /// Deposit `amount` base units for `payer`
    pub fn deposit(&mut self, payer: AccountId, amount: u128) -> Result<()> {
        let now = self.clock.now();
        let scaled = self.scale(amount)?;

        let mut settlement = self.settle(&payer, now);
        settlement.payer.balance = settlement
            .payer
            .balance
            .checked_add(scaled)
            .ok_or_else(|| Error::Overflow(format!("balance of {}", payer)))?;
        let holdings = self.credit_holdings(amount)?;

        self.payers.insert(payer, settlement.payer);
        self.holdings = holdings;

        tracing::info!(token = %self.token.address, %payer, amount, "Deposit");
        self.events.emit(now, Event::Deposit { payer, amount });
        Ok(())
    }

    /// Open a stream with the default nonce
    pub fn create_stream(
        &mut self,
        payer: AccountId,
        payee: AccountId,
        rate: u128,
    ) -> Result<StreamId> {
        self.create_stream_with_nonce(payer, payee, rate, 0)
    }

    /// Open a stream paying `rate` internal units per second
    ///
    /// The payer must not be in debt once their existing streams are settled.
    pub fn create_stream_with_nonce(
        &mut self,
        payer: AccountId,
        payee: AccountId,
        rate: u128,
        nonce: u64,
    ) -> Result<StreamId> {
        let now = self.clock.now();
        let settlement = self.settle(&payer, now);
        let (payer_state, stream) =
            self.prepare_stream(settlement, payer, payee, rate, nonce, now, None)?;

        let stream_id = stream.id;
        self.payers.insert(payer, payer_state);
        self.streams.insert(stream_id, stream);

        tracing::info!(
            token = %self.token.address,
            %payer,
            %payee,
            rate,
            %stream_id,
            "Stream created"
        );
        self.events.emit(now, Event::StreamCreated {
            stream_id,
            payer,
            payee,
            rate,
        });
        Ok(stream_id)
    }

    /// Deposit and open a stream in one step
    pub fn deposit_and_create(
        &mut self,
        payer: AccountId,
        amount: u128,
        payee: AccountId,
        rate: u128,
    ) -> Result<StreamId> {
        let now = self.clock.now();
        let scaled = self.scale(amount)?;

        let mut staged = self.settle(&payer, now).payer;
        staged.balance = staged
            .balance
            .checked_add(scaled)
            .ok_or_else(|| Error::Overflow(format!("balance of {}", payer)))?;
        // The fresh deposit may clear debt, so settle again before the debt check
        let settlement = math::settle_payer(&staged, now);
        let (payer_state, stream) =
            self.prepare_stream(settlement, payer, payee, rate, 0, now, None)?;
        let holdings = self.credit_holdings(amount)?;

        let stream_id = stream.id;
        self.payers.insert(payer, payer_state);
        self.streams.insert(stream_id, stream);
        self.holdings = holdings;

        tracing::info!(
            token = %self.token.address,
            %payer,
            %payee,
            amount,
            rate,
            %stream_id,
            "Deposit and stream created"
        );
        self.events.emit(now, Event::Deposit { payer, amount });
        self.events.emit(now, Event::StreamCreated {
            stream_id,
            payer,
            payee,
            rate,
        });
        Ok(stream_id)
    }

    /// Pay `amount` base units to the payee of a stream
    ///
    /// All or nothing: fails if `amount` exceeds the settled balance.
    pub fn withdraw(&mut self, stream_id: StreamId, amount: u128) -> Result<()> {
        self.withdraw_inner(stream_id, Some(amount)).map(|_| ())
    }

    /// Pay the payee everything currently withdrawable, returning the amount
    pub fn withdraw_all(&mut self, stream_id: StreamId) -> Result<u128> {
        self.withdraw_inner(stream_id, None)
    }

    fn withdraw_inner(&mut self, stream_id: StreamId, amount: Option<u128>) -> Result<u128> {
        let now = self.clock.now();
        let stream = self.get_stream(&stream_id)?;
        let settlement = self.settle(&stream.payer, now);
        let mut settled = math::settle_stream(stream, settlement.paid_until);

        let available = settled.accrued / self.divisor;
        let amount = amount.unwrap_or(available);
        if amount > available {
            tracing::warn!(%stream_id, amount, available, "Withdrawal rejected");
            return Err(Error::InsufficientFunds(format!(
                "requested {} but only {} withdrawable from stream {}",
                amount, available, stream_id
            )));
        }

        settled.accrued -= amount * self.divisor;
        let holdings = self.debit_holdings(amount)?;

        let (payer, payee) = (settled.payer, settled.payee);
        self.payers.insert(payer, settlement.payer);
        self.streams.insert(stream_id, settled);
        self.holdings = holdings;

        tracing::info!(token = %self.token.address, %stream_id, %payee, amount, "Withdraw");
        self.events.emit(now, Event::Withdraw {
            stream_id,
            payer,
            payee,
            amount,
        });
        Ok(amount)
    }

    /// Close a stream, paying the payee what is funded so far
    ///
    /// Returns the payout. Anything the payer had not yet streamed stays in
    /// their balance, along with the sub-unit remainder of the payout.
    pub fn cancel_stream(&mut self, stream_id: StreamId) -> Result<u128> {
        let now = self.clock.now();
        let stream = self.get_stream(&stream_id)?.clone();
        let settlement = self.settle(&stream.payer, now);
        let (payer_state, payout) = self.close_stream(&stream, settlement)?;
        let holdings = self.debit_holdings(payout)?;

        self.streams.remove(&stream_id);
        self.payers.insert(stream.payer, payer_state);
        self.holdings = holdings;

        tracing::info!(token = %self.token.address, %stream_id, payout, "Stream cancelled");
        self.events.emit(now, Event::StreamCancelled {
            stream_id,
            payer: stream.payer,
            payee: stream.payee,
            rate: stream.rate,
            payout,
        });
        Ok(payout)
    }

    /// Replace a stream with one to `payee` at `rate`, atomically
    pub fn modify_stream(
        &mut self,
        stream_id: StreamId,
        payee: AccountId,
        rate: u128,
    ) -> Result<StreamId> {
        let now = self.clock.now();
        let old = self.get_stream(&stream_id)?.clone();
        let settlement = self.settle(&old.payer, now);
        let (released, payout) = self.close_stream(&old, settlement)?;

        let staged = PayerSettlement {
            payer: released,
            paid_until: settlement.paid_until,
        };
        let (payer_state, stream) =
            self.prepare_stream(staged, old.payer, payee, rate, old.nonce, now, Some(stream_id))?;
        let holdings = self.debit_holdings(payout)?;

        let new_stream_id = stream.id;
        self.streams.remove(&stream_id);
        self.streams.insert(new_stream_id, stream);
        self.payers.insert(old.payer, payer_state);
        self.holdings = holdings;

        tracing::info!(
            token = %self.token.address,
            old = %stream_id,
            new = %new_stream_id,
            "Stream modified"
        );
        self.events.emit(now, Event::StreamCancelled {
            stream_id,
            payer: old.payer,
            payee: old.payee,
            rate: old.rate,
            payout,
        });
        self.events.emit(now, Event::StreamCreated {
            stream_id: new_stream_id,
            payer: old.payer,
            payee,
            rate,
        });
        self.events.emit(now, Event::StreamModified {
            old_stream_id: stream_id,
            new_stream_id,
            payer: old.payer,
            payee,
            rate,
        });
        Ok(new_stream_id)
    }

    /// Withdraw `amount` base units of the payer's unencumbered deposit
    pub fn withdraw_deposit(&mut self, payer: AccountId, amount: u128) -> Result<()> {
        self.withdraw_deposit_inner(payer, Some(amount)).map(|_| ())
    }

    /// Withdraw the payer's whole unencumbered deposit, returning the amount
    pub fn withdraw_deposit_all(&mut self, payer: AccountId) -> Result<u128> {
        self.withdraw_deposit_inner(payer, None)
    }

    fn withdraw_deposit_inner(&mut self, payer: AccountId, amount: Option<u128>) -> Result<u128> {
        let now = self.clock.now();
        let mut settlement = self.settle(&payer, now);

        if settlement.is_exhausted(now) {
            tracing::warn!(
                %payer,
                paid_until = settlement.paid_until,
                now,
                "Payer withdrawal rejected: in debt"
            );
            return Err(Error::InsufficientFunds(format!(
                "payer {} is in debt since {}",
                payer, settlement.paid_until
            )));
        }

        let available = settlement.payer.balance / self.divisor;
        let amount = amount.unwrap_or(available);
        if amount > available {
            tracing::warn!(%payer, amount, available, "Payer withdrawal rejected");
            return Err(Error::InsufficientFunds(format!(
                "requested {} but payer {} has {} unencumbered",
                amount, payer, available
            )));
        }

        settlement.payer.balance -= amount * self.divisor;
        let holdings = self.debit_holdings(amount)?;

        self.payers.insert(payer, settlement.payer);
        self.holdings = holdings;

        tracing::info!(token = %self.token.address, %payer, amount, "Payer withdraw");
        self.events.emit(now, Event::PayerWithdraw { payer, amount });
        Ok(amount)
    }

    /// What a payee could withdraw now, and what is owed but unfunded
    pub fn withdrawable(&self, stream_id: StreamId) -> Result<Withdrawable> {
        let now = self.clock.now();
        let stream = self.get_stream(&stream_id)?;
        let settlement = self.settle(&stream.payer, now);
        let settled = math::settle_stream(stream, settlement.paid_until);

        Ok(Withdrawable {
            withdrawable_amount: settled.accrued / self.divisor,
            last_update: settlement.paid_until,
            owed: math::unfunded(stream.rate, settlement.paid_until, now) / self.divisor,
        })
    }

    /// Payer balance in base units net of unsettled obligations; negative is debt
    pub fn payer_balance(&self, payer: &AccountId) -> i128 {
        let now = self.clock.now();
        let state = self.payers.get(payer).copied().unwrap_or_default();
        // Truncates toward zero, matching whole-unit payouts
        math::net_balance(&state, now) / self.divisor as i128
    }

    /// Stored (unsettled) payer state
    pub fn payer(&self, payer: &AccountId) -> PayerState {
        self.payers.get(payer).copied().unwrap_or_default()
    }

    /// Look up a stream
    pub fn stream(&self, stream_id: &StreamId) -> Option<&Stream> {
        self.streams.get(stream_id)
    }

    /// ID a stream with these parameters would have on this ledger
    pub fn stream_id(
        &self,
        payer: &AccountId,
        payee: &AccountId,
        rate: u128,
        nonce: u64,
    ) -> StreamId {
        derive_stream_id(&self.token, payer, payee, rate, nonce)
    }

    /// Active streams paid by `payer`
    pub fn streams_of(&self, payer: &AccountId) -> Vec<&Stream> {
        self.streams.values().filter(|s| s.payer == *payer).collect()
    }

    /// Number of active streams
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Base units held by the ledger
    pub fn holdings(&self) -> u128 {
        self.holdings
    }

    /// Token this ledger accounts for
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Ledger address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Journal of committed transitions
    pub fn events(&self) -> &[EventRecord] {
        self.events.records()
    }

    /// Journal records from sequence `since` onwards
    pub fn events_since(&self, since: u64) -> &[EventRecord] {
        self.events.since(since)
    }

    /// Verify that the ledger can pay every payer and payee it owes
    ///
    /// Liabilities are payer balances, accrued stream balances and value
    /// debited from payers but not yet credited to their streams.
    pub fn check_solvency(&self) -> Result<()> {
        let mut liabilities: u128 = 0;
        let mut rates: HashMap<AccountId, u128> = HashMap::new();
        let overflow = || Error::InvariantViolation("liabilities overflow u128".to_string());

        for state in self.payers.values() {
            liabilities = liabilities.checked_add(state.balance).ok_or_else(overflow)?;
        }

        for stream in self.streams.values() {
            let payer = self.payer(&stream.payer);
            if stream.last_update > payer.last_update {
                return Err(Error::InvariantViolation(format!(
                    "stream {} settled to {} past its payer's {}",
                    stream.id, stream.last_update, payer.last_update
                )));
            }
            liabilities = liabilities
                .checked_add(stream.accrued)
                .and_then(|l| l.checked_add(math::reserved_for_stream(stream, &payer)))
                .ok_or_else(overflow)?;
            let rate = rates.entry(stream.payer).or_default();
            *rate = rate.saturating_add(stream.rate);
        }

        for (account, state) in &self.payers {
            let expected = rates.get(account).copied().unwrap_or(0);
            if state.total_rate != expected {
                return Err(Error::InvariantViolation(format!(
                    "payer {} total rate {} but streams sum to {}",
                    account, state.total_rate, expected
                )));
            }
        }

        let assets = self
            .holdings
            .checked_mul(self.divisor)
            .ok_or_else(|| Error::InvariantViolation("holdings overflow u128".to_string()))?;
        if liabilities > assets {
            return Err(Error::InvariantViolation(format!(
                "liabilities {} exceed holdings {}",
                liabilities, assets
            )));
        }

        Ok(())
    }

    /// Settle a payer against `now` without committing
    fn settle(&self, payer: &AccountId, now: u64) -> PayerSettlement {
        let state = self.payers.get(payer).copied().unwrap_or_default();
        let settlement = math::settle_payer(&state, now);
        if settlement.is_exhausted(now) {
            tracing::debug!(
                %payer,
                paid_until = settlement.paid_until,
                now,
                "Payer funds exhausted"
            );
        }
        settlement
    }

    /// Validate and build a new stream on top of a settled payer
    #[allow(clippy::too_many_arguments)]
    fn prepare_stream(
        &self,
        settlement: PayerSettlement,
        payer: AccountId,
        payee: AccountId,
        rate: u128,
        nonce: u64,
        now: u64,
        replacing: Option<StreamId>,
    ) -> Result<(PayerState, Stream)> {
        if rate == 0 {
            return Err(Error::InvalidStream("rate must be positive".to_string()));
        }
        if payee.is_zero() {
            return Err(Error::InvalidStream("payee must not be the zero address".to_string()));
        }

        let id = self.stream_id(&payer, &payee, rate, nonce);
        if self.streams.contains_key(&id) && replacing != Some(id) {
            tracing::warn!(stream_id = %id, "Stream creation rejected: duplicate");
            return Err(Error::DuplicateStream(id));
        }

        if settlement.is_exhausted(now) {
            tracing::warn!(
                %payer,
                paid_until = settlement.paid_until,
                now,
                "Stream creation rejected: payer in debt"
            );
            return Err(Error::InsufficientFunds(format!(
                "payer {} is in debt since {}",
                payer, settlement.paid_until
            )));
        }

        let mut payer_state = settlement.payer;
        payer_state.total_rate = payer_state
            .total_rate
            .checked_add(rate)
            .ok_or_else(|| Error::Overflow(format!("total rate of {}", payer)))?;

        let stream = Stream {
            id,
            payer,
            payee,
            rate,
            nonce,
            created_at: now,
            last_update: settlement.paid_until,
            accrued: 0,
        };

        Ok((payer_state, stream))
    }

    /// Settle a stream for closing: release its rate and return the payout
    fn close_stream(
        &self,
        stream: &Stream,
        settlement: PayerSettlement,
    ) -> Result<(PayerState, u128)> {
        let settled = math::settle_stream(stream, settlement.paid_until);
        let payout = settled.accrued / self.divisor;
        let dust = settled.accrued % self.divisor;

        let mut payer_state = settlement.payer;
        payer_state.total_rate = payer_state.total_rate.checked_sub(stream.rate).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "payer {} total rate below stream rate {}",
                stream.payer, stream.rate
            ))
        })?;
        payer_state.balance = payer_state
            .balance
            .checked_add(dust)
            .ok_or_else(|| Error::Overflow(format!("balance of {}", stream.payer)))?;

        Ok((payer_state, payout))
    }

    fn get_stream(&self, stream_id: &StreamId) -> Result<&Stream> {
        self.streams
            .get(stream_id)
            .ok_or_else(|| Error::NotFound(format!("stream {}", stream_id)))
    }

    fn scale(&self, amount: u128) -> Result<u128> {
        amount
            .checked_mul(self.divisor)
            .ok_or_else(|| Error::Overflow(format!("{} base units", amount)))
    }

    fn credit_holdings(&self, amount: u128) -> Result<u128> {
        self.holdings
            .checked_add(amount)
            .ok_or_else(|| Error::Overflow("ledger holdings".to_string()))
    }

    fn debit_holdings(&self, amount: u128) -> Result<u128> {
        self.holdings.checked_sub(amount).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "payout {} exceeds holdings {}",
                amount, self.holdings
            ))
        })
    }
}
