//! Canonical hashing of ledger structures.
//!
//! Values are serialised with `serde_json` from structs whose field order is
//! fixed by their declaration, so logically identical inputs always produce
//! identical bytes and therefore identical digests.

use crate::error::ChainError;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of every hex digest produced by this module.
pub const HASH_HEX_LEN: usize = 64;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 of raw bytes, hex encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonical bytes of a value.
pub fn canonical_bytes<T: Serialize + ?Sized>(fields: &T) -> Result<Vec<u8>, ChainError> {
    serde_json::to_vec(fields)
        .map_err(|e| ChainError::InvalidRequest(format!("Failed to serialize fields: {}", e)))
}

/// Digest of a value's canonical serialisation.
pub fn digest<T: Serialize + ?Sized>(fields: &T) -> Result<String, ChainError> {
    Ok(sha256_hex(&canonical_bytes(fields)?))
}

/// Number of leading `'0'` characters in a hex digest.
pub fn leading_zero_digits(hash: &str) -> usize {
    hash.bytes().take_while(|b| *b == b'0').count()
}

/// Whether `hash` looks like a digest from this module.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_HEX_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A random 32-byte identifier, hex encoded. Used for records that are not
/// produced by a proof-of-work search.
pub fn random_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
