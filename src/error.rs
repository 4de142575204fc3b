//! Error taxonomy for the wallet and settlement engine.

use crate::market_resolve::SettlementKind;
use crate::models::MarketStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    InsufficientFunds,
    TransactionConflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::TransactionConflict => "transaction_conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid amount {0}: must be a positive integer")]
    InvalidAmount(i64),

    #[error("invalid option '{option}' for market {market_id}")]
    InvalidOption { market_id: String, option: String },

    #[error("invalid market definition: {0}")]
    InvalidMarket(String),

    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("user {0} already exists")]
    UserExists(String),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("wallet for {0} not found")]
    WalletNotFound(String),

    #[error("wallet for {0} already exists")]
    WalletExists(String),

    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("market {0} is not open for betting")]
    MarketNotOpen(String),

    #[error("market {market_id} closed for betting at {close_time}")]
    MarketClosed {
        market_id: String,
        close_time: DateTime<Utc>,
    },

    #[error("market {market_id} is already {status}")]
    AlreadyFinal {
        market_id: String,
        status: MarketStatus,
    },

    #[error("market {0} is still open and cannot be deleted")]
    MarketStillOpen(String),

    #[error("market {market_id} has a {kind} settlement in progress")]
    SettlementInProgress {
        market_id: String,
        kind: SettlementKind,
    },

    #[error("user {0} is disabled")]
    UserDisabled(String),

    #[error("insufficient funds for {user_id}: balance {balance} < {required}")]
    InsufficientFunds {
        user_id: String,
        balance: u64,
        required: u64,
    },

    #[error("{op} gave up after {attempts} conflicting attempts")]
    TransactionConflict { op: &'static str, attempts: u32 },

    #[error("commit of {0} was aborted")]
    CommitAborted(&'static str),

    #[error("balance overflow for {0}")]
    Overflow(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidAmount(_)
            | EngineError::InvalidOption { .. }
            | EngineError::InvalidMarket(_)
            | EngineError::InvalidUser(_) => ErrorKind::Validation,

            EngineError::UserNotFound(_)
            | EngineError::WalletNotFound(_)
            | EngineError::MarketNotFound(_) => ErrorKind::NotFound,

            EngineError::UserExists(_)
            | EngineError::WalletExists(_)
            | EngineError::MarketNotOpen(_)
            | EngineError::MarketClosed { .. }
            | EngineError::AlreadyFinal { .. }
            | EngineError::MarketStillOpen(_)
            | EngineError::SettlementInProgress { .. }
            | EngineError::UserDisabled(_) => ErrorKind::StateConflict,

            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,

            EngineError::TransactionConflict { .. } | EngineError::CommitAborted(_) => {
                ErrorKind::TransactionConflict
            }

            EngineError::Overflow(_)
            | EngineError::Storage(_)
            | EngineError::Codec(_)
            | EngineError::Pattern(_) => ErrorKind::Internal,
        }
    }

    /// Only lost races are worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransactionConflict
    }
}

/// Reject non-positive amounts before anything is touched.
pub fn positive_amount(amount: i64) -> EngineResult<u64> {
    if amount <= 0 {
        return Err(EngineError::InvalidAmount(amount));
    }
    Ok(amount as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_amount() {
        assert_eq!(positive_amount(5).unwrap(), 5);
        assert!(matches!(positive_amount(0), Err(EngineError::InvalidAmount(0))));
        assert!(matches!(positive_amount(-3), Err(EngineError::InvalidAmount(-3))));
    }

    #[test]
    fn test_error_kinds() {
        let err = EngineError::InsufficientFunds {
            user_id: "bob".into(),
            balance: 10,
            required: 20,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert!(err.to_string().contains("balance 10 < 20"));

        let err = EngineError::AlreadyFinal {
            market_id: "mkt_1".into(),
            status: MarketStatus::Cancelled,
        };
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(!err.is_retryable());

        let err = EngineError::TransactionConflict { op: "place_bet", attempts: 3 };
        assert!(err.is_retryable());
    }
}
