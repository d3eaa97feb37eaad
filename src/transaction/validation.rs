/// Validation logic for transactions separated from type definitions
use crate::amount::{Amount, ZERO};
use crate::error::ChainError;
use crate::hashing;
use crate::transaction::types::TransactionRecord;

/// Stateless checks on a transfer request, before any wallet is read.
pub fn validate_transfer_request(from: &str, to: &str, amount: Amount) -> Result<(), ChainError> {
    if from.trim().is_empty() || to.trim().is_empty() {
        return Err(ChainError::InvalidRequest(
            "Sender and receiver addresses are required".to_string(),
        ));
    }
    if from == to {
        return Err(ChainError::InvalidRequest(
            "Sender and receiver must be different wallets".to_string(),
        ));
    }
    if amount <= ZERO {
        return Err(ChainError::InvalidRequest(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

impl TransactionRecord {
    /// Structural checks applied before a record is queued or stored.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.amount <= ZERO {
            return Err(ChainError::InvalidRequest(format!(
                "Transaction {} has non-positive amount {}",
                self.hash, self.amount
            )));
        }
        if !hashing::is_valid_hash(&self.hash) {
            return Err(ChainError::InvalidRequest(format!(
                "Transaction hash {:?} is not a 64-character hex digest",
                self.hash
            )));
        }
        if self.to_address.is_empty() {
            return Err(ChainError::InvalidRequest(
                "Transaction has no receiver".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::TxStatus;

    #[test]
    fn test_transfer_request_rules() {
        let one = Amount::from_num(1);
        assert!(validate_transfer_request("0xa", "0xb", one).is_ok());
        assert!(validate_transfer_request("0xa", "0xa", one).is_err());
        assert!(validate_transfer_request("", "0xb", one).is_err());
        assert!(validate_transfer_request("0xa", "0xb", ZERO).is_err());
        assert!(validate_transfer_request("0xa", "0xb", Amount::from_num(-5)).is_err());
    }

    #[test]
    fn test_record_validation() {
        let record = TransactionRecord::reward("0xminer".to_string(), Amount::from_num(50));
        assert!(record.validate().is_ok());

        let bad_amount = TransactionRecord { amount: ZERO, ..record.clone() };
        assert!(bad_amount.validate().is_err());

        let bad_hash = TransactionRecord {
            hash: "xyz".to_string(),
            status: TxStatus::Pending,
            ..record
        };
        assert!(bad_hash.validate().is_err());
    }
}
