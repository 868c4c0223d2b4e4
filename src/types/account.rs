//! Account-related types for the funds-transfer ledger
//!
//! This module defines the Account row as it is persisted in the accounts
//! table and the identifiers used to address it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account identifier (primary key of the accounts table)
pub type AccountId = u64;

/// Externally visible account number
///
/// Distinct from [`AccountId`]: the id is the storage key, the number is what
/// a customer would quote.
pub type AccountNumber = u64;

/// A ledger account
///
/// Created by provisioning (seeding the store), mutated only by withdraw and
/// deposit while the row is locked, never deleted in-process.
///
/// # Invariant
///
/// `balance >= 0` after every committed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Storage key
    pub id: AccountId,

    /// Customer-facing account number
    pub account_number: AccountNumber,

    /// Account holder name
    pub name: String,

    /// Current balance (fixed-point, never negative once committed)
    pub balance: Decimal,
}

impl Account {
    /// Create a new account row
    pub fn new(
        id: AccountId,
        account_number: AccountNumber,
        name: impl Into<String>,
        balance: Decimal,
    ) -> Self {
        Account {
            id,
            account_number,
            name: name.into(),
            balance,
        }
    }

    /// Whether the account can cover a debit of `amount`
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}
