//! Error taxonomy for vault and strategy operations.
//!
//! Every variant aborts the surrounding transaction; no partial state survives.

use crate::access::{Address, Role};
use rust_decimal::Decimal;
use thiserror::Error;

/// Rejections raised by an external venue (margin pool, spot router, oracle).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    #[error("trade deadline exceeded")]
    DeadlineExceeded,

    #[error("price {price} outside limit {limit}")]
    PriceLimit { price: Decimal, limit: Decimal },

    #[error("swap output {amount_out} below minimum {min_amount_out}")]
    Slippage {
        amount_out: Decimal,
        min_amount_out: Decimal,
    },

    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },

    #[error("invalid amount {0}")]
    InvalidAmount(Decimal),

    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

/// Failures of vault and strategy operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    #[error("access denied: {caller} is not {required}")]
    AccessDenied { caller: Address, required: Role },

    #[error("{0}")]
    InvalidParameter(String),

    /// The single hard safety rail: a remargin may never push leverage past
    /// what the configured buffer allows.
    #[error("do not increase leverage")]
    RiskViolation { leverage: Decimal, limit: Decimal },

    #[error("insufficient liquidity: requested {requested}, recoverable {available}")]
    InsufficientLiquidity { requested: Decimal, available: Decimal },

    #[error("deposit limit exceeded: {total} > {limit}")]
    DepositLimitExceeded { total: Decimal, limit: Decimal },

    #[error("insufficient shares: requested {requested}, balance {balance}")]
    InsufficientShares { requested: Decimal, balance: Decimal },

    #[error("insufficient balance: {account} holds {balance}, needs {required}")]
    InsufficientBalance {
        account: Address,
        balance: Decimal,
        required: Decimal,
    },

    #[error(transparent)]
    Venue(#[from] VenueError),
}

impl StrategyError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        StrategyError::InvalidParameter(reason.into())
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;
pub type VenueResult<T> = Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_violation_message() {
        let err = StrategyError::RiskViolation {
            leverage: dec!(1.2),
            limit: dec!(1.0),
        };
        assert_eq!(err.to_string(), "do not increase leverage");
    }

    #[test]
    fn test_venue_error_converts() {
        let err: StrategyError = VenueError::DeadlineExceeded.into();
        assert_eq!(err, StrategyError::Venue(VenueError::DeadlineExceeded));
        assert_eq!(err.to_string(), "trade deadline exceeded");
    }

    #[test]
    fn test_invalid_parameter_reason_is_message() {
        assert_eq!(StrategyError::invalid("!_buffer").to_string(), "!_buffer");
    }
}
