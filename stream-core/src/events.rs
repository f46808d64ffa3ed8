//! Notifications emitted by the registry and its ledgers
//!
//! Every committed state transition produces exactly one [`EventRecord`].
//! Records are appended to the emitting component's journal and published on
//! a broadcast channel for external indexers.

use crate::types::{u128_string, AccountId, Address, StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// State transition notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Registry deployed a ledger for a token
    LedgerCreated {
        /// Token address
        token: Address,
        /// Ledger address (equal to the predicted address)
        ledger: Address,
    },

    /// Payer deposited funds
    Deposit {
        /// Payer
        payer: AccountId,
        /// Base units deposited
        #[serde(with = "u128_string")]
        amount: u128,
    },

    /// Stream opened
    StreamCreated {
        /// Stream ID
        stream_id: StreamId,
        /// Payer
        payer: AccountId,
        /// Payee
        payee: AccountId,
        /// Internal units per second
        #[serde(with = "u128_string")]
        rate: u128,
    },

    /// Payee withdrew from a stream
    Withdraw {
        /// Stream ID
        stream_id: StreamId,
        /// Payer
        payer: AccountId,
        /// Payee
        payee: AccountId,
        /// Base units paid out
        #[serde(with = "u128_string")]
        amount: u128,
    },

    /// Stream closed
    StreamCancelled {
        /// Stream ID
        stream_id: StreamId,
        /// Payer
        payer: AccountId,
        /// Payee
        payee: AccountId,
        /// Internal units per second
        #[serde(with = "u128_string")]
        rate: u128,
        /// Base units paid to the payee on close
        #[serde(with = "u128_string")]
        payout: u128,
    },

    /// Stream replaced by a new one for the same payer
    StreamModified {
        /// Cancelled stream
        old_stream_id: StreamId,
        /// Replacement stream
        new_stream_id: StreamId,
        /// Payer
        payer: AccountId,
        /// New payee
        payee: AccountId,
        /// New rate
        #[serde(with = "u128_string")]
        rate: u128,
    },

    /// Payer withdrew part of their deposit
    PayerWithdraw {
        /// Payer
        payer: AccountId,
        /// Base units withdrawn
        #[serde(with = "u128_string")]
        amount: u128,
    },
}

impl Event {
    /// Event name as used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Event::LedgerCreated { .. } => "ledger_created",
            Event::Deposit { .. } => "deposit",
            Event::StreamCreated { .. } => "stream_created",
            Event::Withdraw { .. } => "withdraw",
            Event::StreamCancelled { .. } => "stream_cancelled",
            Event::StreamModified { .. } => "stream_modified",
            Event::PayerWithdraw { .. } => "payer_withdraw",
        }
    }
}

/// Journaled event with ordering metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Position in the emitting journal, starting at 0
    pub sequence: u64,

    /// Token the emitting component is scoped to
    pub token: Address,

    /// Ledger clock timestamp (seconds)
    pub timestamp: u64,

    /// Payload
    pub event: Event,
}

impl EventRecord {
    /// Timestamp as UTC date-time
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }
}

/// Append-only journal that also fans records out to subscribers
#[derive(Debug)]
pub struct EventLog {
    token: Address,
    records: Vec<EventRecord>,
    sink: Option<broadcast::Sender<EventRecord>>,
}

impl EventLog {
    /// Create an empty journal scoped to `token`
    pub fn new(token: Address, sink: Option<broadcast::Sender<EventRecord>>) -> Self {
        Self {
            token,
            records: Vec::new(),
            sink,
        }
    }

    /// Append and publish an event
    pub fn emit(&mut self, timestamp: u64, event: Event) -> &EventRecord {
        self.emit_for(self.token, timestamp, event)
    }

    /// Append and publish an event attributed to `token`
    pub fn emit_for(&mut self, token: Address, timestamp: u64, event: Event) -> &EventRecord {
        let record = EventRecord {
            event_id: Uuid::now_v7(),
            sequence: self.records.len() as u64,
            token,
            timestamp,
            event,
        };

        if let Some(sink) = &self.sink {
            // No subscribers is not an error
            let _ = sink.send(record.clone());
        }

        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// All records in emission order
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with `sequence >= since`
    pub fn since(&self, since: u64) -> &[EventRecord] {
        let start = usize::try_from(since)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing was emitted yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
