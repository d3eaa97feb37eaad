use crate::error::ChainError;
use crate::pow::MAX_DIFFICULTY;
use serde::{Deserialize, Serialize};

/// Default number of leading zero hex digits required of a block hash.
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Process-wide mining settings. Persisted as a singleton record and never
/// part of any hashed data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningConfig {
    pub mining_address: Option<String>,
    pub difficulty: u32,
    pub mining: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            mining_address: None,
            difficulty: DEFAULT_DIFFICULTY,
            mining: false,
        }
    }
}

/// Rejects difficulties that are non-positive or beyond the digest length.
pub fn validate_difficulty(difficulty: u64) -> Result<u32, ChainError> {
    if difficulty == 0 || difficulty > MAX_DIFFICULTY as u64 {
        return Err(ChainError::InvalidDifficulty(difficulty));
    }
    Ok(difficulty as u32)
}

/// Snapshot of the engine for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningStatus {
    pub mining: bool,
    pub difficulty: u32,
    pub mining_address: Option<String>,
    pub blocks_mined: u64,
    pub height: u64,
    pub pending_transactions: usize,
}
