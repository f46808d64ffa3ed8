//! Deterministic identifiers
//!
//! This module provides:
//! - Ledger address prediction for a (registry, token) pair
//! - Stream ID derivation
//! - SHA-256 helpers
//!
//! Ledger addresses follow a salted, content-addressed scheme:
//!
//! ```text
//! address = SHA256(0xff || registry || salt(token) || code_hash)[12..32]
//! salt(token) = token left-padded to 32 bytes
//! ```
//!
//! Everything on the right-hand side is known before the ledger exists, so an
//! address can be predicted off-instance and later checked against creation.

use crate::types::{AccountId, Address, StreamId, Token};
use sha2::{Digest, Sha256};

/// Domain tag hashed into the ledger code hash
const LEDGER_CODE_TAG: &[u8] = b"streampay.ledger.v1";

/// Prefix byte separating address derivation from other SHA-256 uses
const DERIVATION_PREFIX: u8 = 0xff;

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash identifying the ledger implementation
pub fn ledger_code_hash() -> [u8; 32] {
    hash_bytes(LEDGER_CODE_TAG)
}

/// Salt for a token: its address left-padded to a 32-byte word
pub fn token_salt(token: &Address) -> [u8; 32] {
    token.to_word()
}

/// Predict the address of the ledger `registry` deploys for `token`
///
/// Pure and deterministic; for a fixed registry it is injective over tokens
/// up to SHA-256 collisions.
pub fn derive_ledger_address(registry: &Address, token: &Address) -> Address {
    let mut hasher = Sha256::new();
    hasher.update([DERIVATION_PREFIX]);
    hasher.update(registry.as_bytes());
    hasher.update(token_salt(token));
    hasher.update(ledger_code_hash());
    let digest: [u8; 32] = hasher.finalize().into();

    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::from_bytes(bytes)
}

/// Derive the ID of a stream
pub fn derive_stream_id(
    token: &Token,
    payer: &AccountId,
    payee: &AccountId,
    rate: u128,
    nonce: u64,
) -> StreamId {
    let mut hasher = Sha256::new();
    hasher.update(token.address.as_bytes());
    hasher.update(payer.as_bytes());
    hasher.update(payee.as_bytes());
    hasher.update(rate.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    StreamId::from_bytes(hasher.finalize().into())
}
