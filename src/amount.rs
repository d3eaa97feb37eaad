//! Fixed-point value type used for balances, transfers and rewards.

use crate::error::ChainError;
use fixed::types::I32F32;

/// Decimal amount with 32 fractional bits.
pub type Amount = I32F32;

pub const ZERO: Amount = I32F32::ZERO;

/// Converts a client-supplied float into an `Amount`, rejecting values that
/// are not finite, not positive, or out of range.
pub fn parse_positive(value: f64) -> Result<Amount, ChainError> {
    if !value.is_finite() {
        return Err(ChainError::InvalidRequest(format!(
            "Amount must be a finite number, got {}",
            value
        )));
    }
    let amount = Amount::checked_from_num(value).ok_or_else(|| {
        ChainError::InvalidRequest(format!("Amount {} is out of range", value))
    })?;
    if amount <= ZERO {
        return Err(ChainError::InvalidRequest(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(amount)
}

/// Serde adapter that stores an `Amount` as its exact decimal string.
pub mod as_decimal_str {
    use super::Amount;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(|e| D::Error::custom(format!("invalid amount {:?}: {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive(25.0).unwrap(), Amount::from_num(25));
        assert!(parse_positive(0.0).is_err());
        assert!(parse_positive(-3.5).is_err());
        assert!(parse_positive(f64::NAN).is_err());
        assert!(parse_positive(1e12).is_err());
    }

    #[test]
    fn test_decimal_string_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "as_decimal_str")]
            value: Amount,
        }

        let json = serde_json::to_string(&Wrapper { value: Amount::from_num(75.5) }).unwrap();
        assert_eq!(json, r#"{"value":"75.5"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, Amount::from_num(75.5));
    }
}
