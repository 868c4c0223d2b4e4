//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! - `account`: Account row and identifiers
//! - `transaction`: Propagation policies, transfer requests, operation records
//! - `error`: Error taxonomy

pub mod account;
pub mod error;
pub mod transaction;

pub use account::{Account, AccountId, AccountNumber};
pub use error::{ErrorCategory, LedgerError, ResourceError};
pub use transaction::{OperationRecord, OperationType, Propagation, TransferRequest};
