//! StreamPay Core
//!
//! Per-token payment streaming: a registry deploys one ledger per token at a
//! deterministic address, and each ledger lets payers deposit and stream
//! funds to payees at a constant per-second rate.
//!
//! # Architecture
//!
//! - **Registry**: Factory keyed by token, addresses predictable before deployment
//! - **Single Writer**: One actor task per ledger serializes its commands
//! - **Settle on Touch**: Accrual is computed lazily from the clock
//! - **Fixed Point**: All accounting at 20 decimals in `u128`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]
//!
//! # Invariants
//!
//! - Solvency: payer balances plus accrued stream value never exceed holdings
//! - Total rate: a payer's `total_rate` equals the sum of their active streams
//! - Cursors: no stream is settled past its payer's funded-until instant
//! - One ledger per token, at an address that never changes

pub mod actor;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod ledger;
pub mod math;
pub mod metrics;
pub mod registry;
pub mod types;

// Re-exports
pub use actor::{spawn_ledger_actor, LedgerHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, TokenConfig};
pub use error::{Error, Result};
pub use events::{Event, EventRecord};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use registry::Registry;
pub use types::{AccountId, Address, PayerState, Stream, StreamId, Token, Withdrawable};
