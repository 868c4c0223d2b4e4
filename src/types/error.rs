//! Error types for the funds-transfer ledger
//!
//! This module defines every error the ledger core can surface, from input
//! validation through lock acquisition, transaction coordination, dispatch,
//! persistence and compensation.
//!
//! # Error Categories
//!
//! - **Validation**: bad input (non-positive amounts, zero timeouts); never retried
//! - **Business**: rule rejections such as insufficient funds
//! - **Not found**: unknown accounts or rows
//! - **Timeout**: lock acquisition ran out of time; the caller may retry
//! - **Programming**: unsupported propagation, unbalanced begin/end, unknown operations
//! - **Integrity**: unexpected affected-row counts, failed compensations
//! - **Resource**: failures reported by the storage collaborator

use super::account::{AccountId, AccountNumber};
use super::transaction::{OperationType, Propagation};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures reported by the storage collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    /// Waited too long for another transaction to release a row lock
    #[error("Timed out after {waited_ms}ms waiting for row lock on account {account}")]
    LockWaitTimeout {
        /// Account whose row was contended
        account: AccountId,
        /// How long the statement waited
        waited_ms: u64,
    },

    /// Statement issued on a connection that was already released
    #[error("Connection {connection} is closed")]
    ConnectionClosed {
        /// Connection identifier
        connection: u64,
    },

    /// The resource refused to hand out a connection
    #[error("Resource unavailable: {message}")]
    Unavailable {
        /// Description of the refusal
        message: String,
    },

    /// Failure deliberately injected to exercise recovery paths
    #[error("Injected fault: {message}")]
    Injected {
        /// Description of the injected fault
        message: String,
    },
}

/// Broad classification of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Business,
    NotFound,
    Timeout,
    Programming,
    Integrity,
    Resource,
    Service,
}

/// Main error type for the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Amount was zero or negative
    #[error("Invalid {operation} amount {amount}: amount must be greater than zero")]
    InvalidAmount {
        /// Operation that received the amount
        operation: OperationType,
        /// The rejected amount
        amount: Decimal,
    },

    /// Argument outside its accepted domain (e.g. a non-positive timeout)
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem
        message: String,
    },

    /// Debit would take the balance below zero
    #[error(
        "Insufficient funds for {operation} on account {account}: available {available}, requested {requested}"
    )]
    InsufficientFunds {
        /// Operation that was rejected
        operation: OperationType,
        /// Account that was short
        account: AccountId,
        /// Balance at the time of the check
        available: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// No account with this id exists
    #[error("Account {account} does not exist")]
    AccountNotFound {
        /// Requested account id
        account: AccountId,
    },

    /// No account with this account number exists
    #[error("Account number {account_number} does not exist")]
    AccountNumberNotFound {
        /// Requested account number
        account_number: AccountNumber,
    },

    /// Row-exclusive read found no row
    #[error("Row for account {account} not found")]
    RowNotFound {
        /// Requested account id
        account: AccountId,
    },

    /// Lock acquisition did not complete within its budget
    #[error("Timed out after {timeout_ms}ms acquiring lock on {keys}")]
    LockTimeout {
        /// Rendered key or key list
        keys: String,
        /// Budget that was exhausted
        timeout_ms: u64,
    },

    /// Unlock requested for keys the caller did not hold
    #[error("One or more keys were not locked by the caller: {keys:?}")]
    LockNotHeld {
        /// Rendered keys that were not held
        keys: Vec<String>,
    },

    /// Propagation policy the coordinator cannot honour
    #[error("Transaction propagation not supported: {propagation}")]
    UnsupportedPropagation {
        /// The rejected policy
        propagation: Propagation,
    },

    /// `end` or `current_connection` called with no active transaction
    #[error("No active transaction in this context")]
    NoActiveTransaction,

    /// Dispatcher could not resolve an operation
    #[error("No matching operation {service}::{operation} for the supplied arguments")]
    NoMatchingOperation {
        /// Service the call was addressed to
        service: String,
        /// Operation name
        operation: String,
    },

    /// A single-row update touched a number of rows other than one
    #[error("Data integrity violation on account {account}: {rows_affected} rows affected, expected 1")]
    DataIntegrity {
        /// Account being updated
        account: AccountId,
        /// Rows the update reported
        rows_affected: u64,
    },

    /// New balance does not fit the decimal range
    #[error("Arithmetic overflow in {operation} for account {account}")]
    ArithmeticOverflow {
        /// Operation whose balance computation overflowed
        operation: OperationType,
        /// Account being mutated
        account: AccountId,
    },

    /// A ledger operation could not be applied
    #[error("{operation} failed for account {account}: {reason}")]
    OperationFailed {
        /// Operation that failed
        operation: OperationType,
        /// Account being mutated
        account: AccountId,
        /// Underlying cause
        reason: String,
    },

    /// Transfer failed after debiting the source and crediting it back failed too
    ///
    /// Funds remain debited from the source; manual reconciliation is needed.
    #[error(
        "Transfer failed and crediting {amount} back to source account {source_account} failed: {reason}"
    )]
    CompensationFailed {
        /// Account left debited
        source_account: AccountId,
        /// Amount that could not be restored
        amount: Decimal,
        /// Why the compensating deposit failed
        reason: String,
    },

    /// Failure reported by the storage collaborator
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Failure of an unrecognized kind raised while invoking an operation
    #[error("Service error: {message}")]
    Service {
        /// Description of the failure
        message: String,
    },
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidAmount error
    pub fn invalid_amount(operation: OperationType, amount: Decimal) -> Self {
        LedgerError::InvalidAmount { operation, amount }
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        LedgerError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(
        operation: OperationType,
        account: AccountId,
        available: Decimal,
        requested: Decimal,
    ) -> Self {
        LedgerError::InsufficientFunds {
            operation,
            account,
            available,
            requested,
        }
    }

    /// Create an AccountNotFound error
    pub fn account_not_found(account: AccountId) -> Self {
        LedgerError::AccountNotFound { account }
    }

    /// Create a RowNotFound error
    pub fn row_not_found(account: AccountId) -> Self {
        LedgerError::RowNotFound { account }
    }

    /// Create a LockTimeout error
    pub fn lock_timeout(keys: impl Into<String>, timeout_ms: u64) -> Self {
        LedgerError::LockTimeout {
            keys: keys.into(),
            timeout_ms,
        }
    }

    /// Create a NoMatchingOperation error
    pub fn no_matching_operation(service: impl Into<String>, operation: impl Into<String>) -> Self {
        LedgerError::NoMatchingOperation {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Create a DataIntegrity error
    pub fn data_integrity(account: AccountId, rows_affected: u64) -> Self {
        LedgerError::DataIntegrity {
            account,
            rows_affected,
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: OperationType, account: AccountId) -> Self {
        LedgerError::ArithmeticOverflow { operation, account }
    }

    /// Create an OperationFailed error
    pub fn operation_failed(
        operation: OperationType,
        account: AccountId,
        reason: impl Into<String>,
    ) -> Self {
        LedgerError::OperationFailed {
            operation,
            account,
            reason: reason.into(),
        }
    }

    /// Create a CompensationFailed error
    pub fn compensation_failed(
        source_account: AccountId,
        amount: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        LedgerError::CompensationFailed {
            source_account,
            amount,
            reason: reason.into(),
        }
    }

    /// Create a Service error
    pub fn service(message: impl Into<String>) -> Self {
        LedgerError::Service {
            message: message.into(),
        }
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InvalidAmount { .. } | LedgerError::InvalidArgument { .. } => {
                ErrorCategory::Validation
            }
            LedgerError::InsufficientFunds { .. } => ErrorCategory::Business,
            LedgerError::AccountNotFound { .. }
            | LedgerError::AccountNumberNotFound { .. }
            | LedgerError::RowNotFound { .. } => ErrorCategory::NotFound,
            LedgerError::LockTimeout { .. } => ErrorCategory::Timeout,
            LedgerError::LockNotHeld { .. }
            | LedgerError::UnsupportedPropagation { .. }
            | LedgerError::NoActiveTransaction
            | LedgerError::NoMatchingOperation { .. } => ErrorCategory::Programming,
            LedgerError::DataIntegrity { .. }
            | LedgerError::ArithmeticOverflow { .. }
            | LedgerError::OperationFailed { .. }
            | LedgerError::CompensationFailed { .. } => ErrorCategory::Integrity,
            LedgerError::Resource(_) => ErrorCategory::Resource,
            LedgerError::Service { .. } => ErrorCategory::Service,
        }
    }

    /// Whether the caller may reasonably retry the request
    ///
    /// Only lock timeouts qualify. Integrity failures are not retried because
    /// a retry under read-then-write races could hide the underlying bug.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    /// Stable reason code exposed to API consumers, where one exists
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            LedgerError::AccountNotFound { .. } | LedgerError::AccountNumberNotFound { .. } => {
                Some("202")
            }
            LedgerError::InsufficientFunds { operation, .. } => match operation {
                OperationType::Transfer => Some("105"),
                OperationType::Withdraw | OperationType::Deposit => Some("203"),
            },
            LedgerError::InvalidAmount { operation, .. } => match operation {
                OperationType::Withdraw => Some("301"),
                OperationType::Deposit => Some("302"),
                OperationType::Transfer => Some("303"),
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal::Decimal;

    #[rstest]
    #[case::invalid_amount(
        LedgerError::invalid_amount(OperationType::Transfer, Decimal::new(-5, 0)),
        "Invalid transfer amount -5: amount must be greater than zero"
    )]
    #[case::insufficient_funds(
        LedgerError::insufficient_funds(OperationType::Withdraw, 1, Decimal::new(750, 0), Decimal::new(751, 0)),
        "Insufficient funds for withdraw on account 1: available 750, requested 751"
    )]
    #[case::account_not_found(
        LedgerError::account_not_found(7),
        "Account 7 does not exist"
    )]
    #[case::lock_timeout(
        LedgerError::lock_timeout("[1, 2]", 50),
        "Timed out after 50ms acquiring lock on [1, 2]"
    )]
    #[case::unsupported_propagation(
        LedgerError::UnsupportedPropagation { propagation: Propagation::Mandatory },
        "Transaction propagation not supported: MANDATORY"
    )]
    #[case::no_matching_operation(
        LedgerError::no_matching_operation("AccountService", "closeAccount"),
        "No matching operation AccountService::closeAccount for the supplied arguments"
    )]
    #[case::data_integrity(
        LedgerError::data_integrity(3, 0),
        "Data integrity violation on account 3: 0 rows affected, expected 1"
    )]
    #[case::resource(
        LedgerError::Resource(ResourceError::ConnectionClosed { connection: 9 }),
        "Resource error: Connection 9 is closed"
    )]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::invalid_amount(LedgerError::invalid_amount(OperationType::Deposit, Decimal::ZERO), ErrorCategory::Validation)]
    #[case::invalid_argument(LedgerError::invalid_argument("timeout"), ErrorCategory::Validation)]
    #[case::insufficient(LedgerError::insufficient_funds(OperationType::Withdraw, 1, Decimal::ZERO, Decimal::ONE), ErrorCategory::Business)]
    #[case::not_found(LedgerError::account_not_found(1), ErrorCategory::NotFound)]
    #[case::row_not_found(LedgerError::row_not_found(1), ErrorCategory::NotFound)]
    #[case::timeout(LedgerError::lock_timeout("1", 10), ErrorCategory::Timeout)]
    #[case::no_tx(LedgerError::NoActiveTransaction, ErrorCategory::Programming)]
    #[case::integrity(LedgerError::data_integrity(1, 2), ErrorCategory::Integrity)]
    #[case::overflow(LedgerError::arithmetic_overflow(OperationType::Deposit, 1), ErrorCategory::Integrity)]
    #[case::compensation(LedgerError::compensation_failed(1, Decimal::ONE, "down"), ErrorCategory::Integrity)]
    #[case::service(LedgerError::service("boom"), ErrorCategory::Service)]
    fn test_error_category(#[case] error: LedgerError, #[case] expected: ErrorCategory) {
        assert_eq!(error.category(), expected);
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(LedgerError::lock_timeout("1", 10).is_retryable());
        assert!(!LedgerError::data_integrity(1, 0).is_retryable());
        assert!(!LedgerError::NoActiveTransaction.is_retryable());
    }

    #[rstest]
    #[case::not_found(LedgerError::account_not_found(7), Some("202"))]
    #[case::withdraw_short(LedgerError::insufficient_funds(OperationType::Withdraw, 1, Decimal::ZERO, Decimal::ONE), Some("203"))]
    #[case::transfer_short(LedgerError::insufficient_funds(OperationType::Transfer, 1, Decimal::ZERO, Decimal::ONE), Some("105"))]
    #[case::withdraw_amount(LedgerError::invalid_amount(OperationType::Withdraw, Decimal::ZERO), Some("301"))]
    #[case::deposit_amount(LedgerError::invalid_amount(OperationType::Deposit, Decimal::ZERO), Some("302"))]
    #[case::transfer_amount(LedgerError::invalid_amount(OperationType::Transfer, Decimal::ZERO), Some("303"))]
    #[case::no_code(LedgerError::NoActiveTransaction, None)]
    fn test_reason_codes(#[case] error: LedgerError, #[case] expected: Option<&str>) {
        assert_eq!(error.reason_code(), expected);
    }

    #[test]
    fn test_resource_error_conversion() {
        let error: LedgerError = ResourceError::Unavailable {
            message: "pool exhausted".to_string(),
        }
        .into();
        assert!(matches!(error, LedgerError::Resource(_)));
        assert_eq!(error.category(), ErrorCategory::Resource);
    }
}
