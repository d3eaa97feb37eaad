/// Transaction types for MyCoin
use crate::amount::{self, Amount};
use crate::error::ChainError;
use crate::hashing;
use crate::pow::Work;
use serde::{Deserialize, Serialize};

/// Lifecycle of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Confirmed => "CONFIRMED",
            TxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ChainError> {
        match s {
            "PENDING" => Ok(TxStatus::Pending),
            "CONFIRMED" => Ok(TxStatus::Confirmed),
            "FAILED" => Ok(TxStatus::Failed),
            other => Err(ChainError::StoreUnavailable(format!(
                "Unknown transaction status {:?}",
                other
            ))),
        }
    }
}

/// A value movement recorded on the ledger.
///
/// `from_address` is `None` only for mining rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub from_address: Option<String>,
    pub to_address: String,
    #[serde(with = "amount::as_decimal_str")]
    pub amount: Amount,
    pub timestamp: i64,
    pub hash: String,
    pub status: TxStatus,
}

impl TransactionRecord {
    /// A mining reward paid to `to_address`. Rewards are never searched, so
    /// their hash is a random identifier.
    pub fn reward(to_address: String, amount: Amount) -> Self {
        TransactionRecord {
            from_address: None,
            to_address,
            amount,
            timestamp: chrono::Utc::now().timestamp_millis(),
            hash: hashing::random_hash(),
            status: TxStatus::Confirmed,
        }
    }

    /// A confirmed transfer whose hash came out of the transfer search.
    pub fn confirmed_transfer(payload: &TransferPayload, hash: String) -> Self {
        TransactionRecord {
            from_address: Some(payload.from_address.clone()),
            to_address: payload.to_address.clone(),
            amount: payload.amount,
            timestamp: payload.timestamp,
            hash,
            status: TxStatus::Confirmed,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.from_address.is_none()
    }

    pub fn involves(&self, address: &str) -> bool {
        self.to_address == address || self.from_address.as_deref() == Some(address)
    }
}

/// The signed portion of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub from_address: String,
    pub to_address: String,
    #[serde(with = "amount::as_decimal_str")]
    pub amount: Amount,
    pub timestamp: i64,
}

impl TransferPayload {
    pub fn new(from_address: &str, to_address: &str, amount: Amount) -> Self {
        TransferPayload {
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            amount,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A signed payload together with the digest its signature covers, ready for
/// the transfer proof-of-work.
///
/// `salt` is random per transfer, so two identical payloads signed in the
/// same millisecond still search distinct hashes.
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub payload: TransferPayload,
    pub digest: String,
    pub salt: String,
}

impl SignedTransfer {
    pub fn new(payload: TransferPayload, digest: String) -> Self {
        SignedTransfer {
            payload,
            digest,
            salt: hashing::random_hash(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferWorkFields<'a> {
    from_address: &'a str,
    to_address: &'a str,
    #[serde(with = "amount::as_decimal_str")]
    amount: Amount,
    timestamp: i64,
    hash: &'a str,
    salt: &'a str,
    nonce: u64,
}

impl Work for SignedTransfer {
    fn hash_with_nonce(&self, nonce: u64) -> Result<String, ChainError> {
        hashing::digest(&TransferWorkFields {
            from_address: &self.payload.from_address,
            to_address: &self.payload.to_address,
            amount: self.payload.amount,
            timestamp: self.payload.timestamp,
            hash: &self.digest,
            salt: &self.salt,
            nonce,
        })
    }
}

/// Direction of a record relative to a queried address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Sent,
    Received,
}

/// One line of an address's transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub hash: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    #[serde(with = "amount::as_decimal_str")]
    pub amount: Amount,
    /// Other party; `None` for mining rewards.
    pub with_address: Option<String>,
    pub timestamp: i64,
    pub status: TxStatus,
}

impl HistoryEntry {
    pub fn for_address(record: TransactionRecord, address: &str) -> Self {
        let outgoing = record.from_address.as_deref() == Some(address);
        let (direction, with_address) = if outgoing {
            (Direction::Sent, Some(record.to_address))
        } else {
            (Direction::Received, record.from_address)
        };

        HistoryEntry {
            hash: record.hash,
            direction,
            amount: record.amount,
            with_address,
            timestamp: record.timestamp,
            status: record.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub pagination: Pagination,
}
