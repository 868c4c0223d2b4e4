//! Transaction-related types for the funds-transfer ledger
//!
//! This module defines propagation policies attached to business operations,
//! the transfer request, and the operation records read from batch input.

use super::account::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction propagation policy of a business operation
///
/// Determines whether a nested transactional call joins the caller's active
/// transaction or forces an independent one. The full policy set is modelled
/// so that declarations can be expressed, but only [`Propagation::Required`]
/// and [`Propagation::RequiresNew`] are accepted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the active transaction, or start one if none is active
    #[default]
    Required,

    /// Always start an independent transaction on a fresh connection
    RequiresNew,

    /// Require an active transaction (unsupported)
    Mandatory,

    /// Join if active, otherwise run without a transaction (unsupported)
    Supports,

    /// Suspend any active transaction (unsupported)
    NotSupported,

    /// Fail if a transaction is active (unsupported)
    Never,
}

impl Propagation {
    /// Whether the transaction coordinator can honour this policy
    pub fn is_supported(self) -> bool {
        matches!(self, Propagation::Required | Propagation::RequiresNew)
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Mandatory => "MANDATORY",
            Propagation::Supports => "SUPPORTS",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
        };
        f.write_str(name)
    }
}

/// Request to move funds between two accounts
///
/// Transient; the amount is validated to be strictly positive by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Account to debit
    pub source_account_id: AccountId,

    /// Account to credit
    pub destination_account_id: AccountId,

    /// Amount to move
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        Self {
            source_account_id,
            destination_account_id,
            amount,
        }
    }
}

/// Ledger operations accepted from batch input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Debit an account
    Withdraw,

    /// Credit an account
    Deposit,

    /// Debit one account and credit another
    Transfer,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Withdraw => "withdraw",
            OperationType::Deposit => "deposit",
            OperationType::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// A single ledger operation as read from the operations file
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    /// Which operation to perform
    pub op_type: OperationType,

    /// Primary account: the debited account for withdraw and transfer,
    /// the credited account for deposit
    pub account: AccountId,

    /// Credited account, present only for transfers
    pub destination: Option<AccountId>,

    /// Operation amount
    pub amount: Decimal,
}
