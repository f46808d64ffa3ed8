//! Error types for the registry and streaming ledgers

use crate::types::{Address, StreamId};
use thiserror::Error;

/// Result type for registry and ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Registry and ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// A ledger is already deployed for the token
    #[error("Ledger already exists for token {token} at {ledger}")]
    AlreadyExists {
        /// Token address
        token: Address,
        /// Address of the existing ledger
        ledger: Address,
    },

    /// Withdrawal, payer withdrawal or stream creation exceeds available funds
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// An identical stream is already active
    #[error("Stream already exists: {0}")]
    DuplicateStream(StreamId),

    /// Amount cannot be represented in token base units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unknown stream or ledger
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stream parameters rejected (zero rate, zero payee)
    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    /// Token precision above what the fixed-point accounting supports
    #[error("Unsupported token decimals: {0} (max 20)")]
    UnsupportedDecimals(u8),

    /// Arithmetic overflow in fixed-point accounting
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Invariant violation (solvency, cursor ordering)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Short stable label, used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::AlreadyExists { .. } => "already_exists",
            Error::InsufficientFunds(_) => "insufficient_funds",
            Error::DuplicateStream(_) => "duplicate_stream",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::NotFound(_) => "not_found",
            Error::InvalidStream(_) => "invalid_stream",
            Error::UnsupportedDecimals(_) => "unsupported_decimals",
            Error::Overflow(_) => "overflow",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("Failed to parse config: {}", err))
    }
}
