//! Error types for the MyCoin ledger

use std::fmt;
use thiserror::Error;

/// Which side of a transfer a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sender,
    Receiver,
    Miner,
    Wallet,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Sender => write!(f, "Sender"),
            Side::Receiver => write!(f, "Receiver"),
            Side::Miner => write!(f, "Miner"),
            Side::Wallet => write!(f, "Wallet"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    #[error("{0} wallet not found: {1}")]
    WalletNotFound(Side, String),
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: String, requested: String },
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),
    #[error("Mining address must be set before starting mining")]
    MiningNotConfigured,
    #[error("Invalid difficulty {0}: must be between 1 and 64")]
    InvalidDifficulty(u64),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Duplicate transaction hash: {0}")]
    DuplicateTransactionHash(String),
    #[error("Wallet already exists: {0}")]
    WalletExists(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Proof-of-work search cancelled")]
    SearchCancelled,
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::StoreUnavailable(format!("Serialization failed: {}", err))
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
