//! Core types for the registry and streaming ledgers
//!
//! All types are designed for:
//! - Deterministic hashing (fixed-width big-endian byte layouts)
//! - Exact arithmetic (`u128` fixed point, `Decimal` at the edges)
//! - Stable serialization (hex strings on the wire)

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Fixed decimal precision of all internal accounting
pub const INTERNAL_DECIMALS: u8 = 20;

/// 20-byte identifier for accounts, tokens, registries and ledgers
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address, never a valid payee
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Address whose low 8 bytes hold `value` (big-endian)
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Left-pad to a 32-byte word
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    /// Check for the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits)
            .map_err(|e| Error::Config(format!("Invalid address {}: {}", s, e)))?;
        let bytes: [u8; 20] = raw
            .try_into()
            .map_err(|_| Error::Config(format!("Address must be 20 bytes: {}", s)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Account identifier (payer or payee)
pub type AccountId = Address;

/// Fungible token referenced by a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Token address
    pub address: Address,

    /// Decimal precision of the token's base unit
    pub decimals: u8,
}

impl Token {
    /// Create new token reference
    pub fn new(address: Address, decimals: u8) -> Self {
        Self { address, decimals }
    }

    /// Scale factor from base units to internal precision
    pub fn divisor(&self) -> Result<u128> {
        if self.decimals > INTERNAL_DECIMALS {
            return Err(Error::UnsupportedDecimals(self.decimals));
        }
        Ok(10u128.pow(u32::from(INTERNAL_DECIMALS - self.decimals)))
    }

    /// Convert a human amount (e.g. `1.5` tokens) to base units, truncating dust
    pub fn to_base_units(&self, amount: Decimal) -> Result<u128> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(Error::InvalidAmount(format!("negative amount {}", amount)));
        }

        let mantissa = amount.mantissa();
        let scale = amount.scale();
        let decimals = u32::from(self.decimals);

        let units = if scale <= decimals {
            10i128
                .checked_pow(decimals - scale)
                .and_then(|factor| mantissa.checked_mul(factor))
                .ok_or_else(|| Error::Overflow(format!("{} at {} decimals", amount, decimals)))?
        } else {
            mantissa / 10i128.pow(scale - decimals)
        };

        u128::try_from(units).map_err(|_| Error::InvalidAmount(amount.to_string()))
    }

    /// Convert base units to a human amount
    pub fn from_base_units(&self, units: u128) -> Result<Decimal> {
        let units = i128::try_from(units)
            .map_err(|_| Error::Overflow(format!("{} base units", units)))?;
        Decimal::try_from_i128_with_scale(units, u32::from(self.decimals))
            .map_err(|e| Error::Overflow(format!("{} base units: {}", units, e)))
    }

    /// Per-second stream rate (internal precision) paying `amount` base units every `period_secs`
    pub fn rate_per_second(&self, amount: u128, period_secs: u64) -> Result<u128> {
        if period_secs == 0 {
            return Err(Error::InvalidStream("period must be positive".to_string()));
        }
        amount
            .checked_mul(self.divisor()?)
            .map(|scaled| scaled / u128::from(period_secs))
            .ok_or_else(|| Error::Overflow(format!("rate for {} per {}s", amount, period_secs)))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} decimals)", self.address, self.decimals)
    }
}

/// Deterministic stream identifier (SHA-256)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId([u8; 32]);

impl StreamId {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| serde::de::Error::custom("stream id must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Serde adapter writing `u128` as a decimal string
///
/// `serde_json::Value` cannot hold numbers above `u64::MAX`.
pub mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as a decimal string
    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Deserialize from a decimal string
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-payer accounting state
///
/// `last_update` is the instant up to which every stream of this payer has
/// been funded and debited from `balance`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerState {
    /// Undebited deposit (internal precision)
    #[serde(with = "u128_string")]
    pub balance: u128,

    /// Sum of the rates of all active streams
    #[serde(with = "u128_string")]
    pub total_rate: u128,

    /// Funded-until timestamp (seconds)
    pub last_update: u64,
}

/// Continuous payment from payer to payee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Stream ID
    pub id: StreamId,

    /// Paying account
    pub payer: AccountId,

    /// Receiving account
    pub payee: AccountId,

    /// Internal units per second
    #[serde(with = "u128_string")]
    pub rate: u128,

    /// Caller-supplied discriminator folded into the ID
    pub nonce: u64,

    /// Creation timestamp (seconds)
    pub created_at: u64,

    /// Settlement cursor, never ahead of the payer's `last_update`
    pub last_update: u64,

    /// Settled and not yet withdrawn (internal precision)
    #[serde(with = "u128_string")]
    pub accrued: u128,
}

/// Withdrawable view of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawable {
    /// Base units the payee could withdraw right now
    #[serde(with = "u128_string")]
    pub withdrawable_amount: u128,

    /// Instant up to which the stream is funded
    pub last_update: u64,

    /// Base units accrued in time but not yet funded by the payer
    #[serde(with = "u128_string")]
    pub owed: u128,
}
