//! Error types
//!
//! Every error surfaced to callers maps to a stable [`ErrorCode`] so upper
//! layers can tell a conflict abort apart from other failures.

use crate::txn::TxnState;
use crate::types::{ColumnId, RowKey, Timestamp, TxnId};
use std::fmt;
use thiserror::Error;

/// Result type for transaction operations
pub type TxnResult<T> = Result<T, TxnError>;

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Commit rejected: a concurrent transaction committed an overlapping cell
    TransactionConflict,
    /// Operation on a transaction that is not Active
    InvalidTransactionState,
    /// Table is not defined in the catalog
    TableUndefined,
    /// Table metadata could not be parsed
    InvalidMetadata,
    /// Underlying store failed
    StorageFailure,
}

impl ErrorCode {
    /// Numeric code, stable across releases
    pub fn code(&self) -> u32 {
        match self {
            Self::TransactionConflict => 523,
            Self::InvalidTransactionState => 524,
            Self::TableUndefined => 1012,
            Self::InvalidMetadata => 1013,
            Self::StorageFailure => 1104,
        }
    }

    /// SQLSTATE-style class code
    pub fn sql_state(&self) -> &'static str {
        match self {
            Self::TransactionConflict => "42900",
            Self::InvalidTransactionState => "25000",
            Self::TableUndefined => "42M03",
            Self::InvalidMetadata => "42M04",
            Self::StorageFailure => "08000",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {} ({})", self.code(), self.sql_state())
    }
}

/// Transaction manager errors
#[derive(Error, Debug)]
pub enum TxnError {
    /// First committer won; retry from a fresh begin
    #[error("transaction {txn_id} aborted due to conflict on {table}/{row}/{column}")]
    Conflict {
        txn_id: TxnId,
        table: String,
        row: RowKey,
        column: ColumnId,
    },

    #[error("transaction {txn_id} is {state:?}, expected Active")]
    InvalidState { txn_id: TxnId, state: TxnState },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid table metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TxnError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } => ErrorCode::TransactionConflict,
            Self::InvalidState { .. } => ErrorCode::InvalidTransactionState,
            Self::TableNotFound(_) => ErrorCode::TableUndefined,
            Self::Metadata(_) => ErrorCode::InvalidMetadata,
            Self::Storage(_) => ErrorCode::StorageFailure,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Only conflicts are worth retrying, and only by the caller
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

/// Errors raised by a [`CellStore`](crate::storage::CellStore)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A different value is already committed at this exact timestamp
    #[error("cell {table}/{row}/{column} already has a different value at timestamp {timestamp}")]
    TimestampExists {
        table: String,
        row: RowKey,
        column: ColumnId,
        timestamp: Timestamp,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_code_is_stable() {
        let err = TxnError::Conflict {
            txn_id: 7,
            table: "T".into(),
            row: RowKey::from("r1"),
            column: ColumnId::parse("a.int_col1"),
        };
        assert_eq!(err.code(), ErrorCode::TransactionConflict);
        assert_eq!(err.code().code(), 523);
        assert_eq!(err.code().sql_state(), "42900");
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "transaction 7 aborted due to conflict on T/r1/a.int_col1"
        );
    }

    #[test]
    fn test_other_errors_not_retryable() {
        let err = TxnError::InvalidState { txn_id: 1, state: TxnState::Aborted };
        assert!(!err.is_retryable());
        assert_eq!(err.code(), ErrorCode::InvalidTransactionState);

        let err: TxnError = StorageError::Unavailable("region offline".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), ErrorCode::StorageFailure);
    }
}
