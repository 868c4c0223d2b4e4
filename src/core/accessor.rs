//! Row-level account persistence
//!
//! `LedgerAccessor` issues the account statements on whatever connection the
//! caller's active transaction holds. It never begins, commits or releases
//! anything itself.

use super::traits::ResourceConnection;
use crate::types::{Account, AccountId, AccountNumber, LedgerError, OperationType};
use rust_decimal::Decimal;
use tracing::{debug, error};

/// Account statements executed on a caller-supplied connection
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerAccessor;

impl LedgerAccessor {
    pub fn new() -> Self {
        LedgerAccessor
    }

    /// Plain read; `None` when no row matches
    pub fn get_account(
        &self,
        connection: &dyn ResourceConnection,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        Ok(connection.select_account(id)?)
    }

    /// Plain read by customer-facing account number
    pub fn get_account_by_number(
        &self,
        connection: &dyn ResourceConnection,
        account_number: AccountNumber,
    ) -> Result<Option<Account>, LedgerError> {
        Ok(connection
            .select_all_accounts()?
            .into_iter()
            .find(|account| account.account_number == account_number))
    }

    pub fn get_all_accounts(
        &self,
        connection: &dyn ResourceConnection,
    ) -> Result<Vec<Account>, LedgerError> {
        Ok(connection.select_all_accounts()?)
    }

    /// Row-exclusive read
    ///
    /// Blocks while another transaction holds the row; the lock is kept until
    /// this connection's transaction ends.
    ///
    /// # Errors
    ///
    /// `RowNotFound` if no such account exists
    pub fn lock_and_read(
        &self,
        connection: &dyn ResourceConnection,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        connection
            .select_account_for_update(id)?
            .ok_or_else(|| {
                error!(account = id, "Failed to lock missing account row");
                LedgerError::row_not_found(id)
            })
    }

    /// Write the balance of one account
    ///
    /// # Errors
    ///
    /// `DataIntegrity` if the statement affected anything other than one row
    pub fn update_balance(
        &self,
        connection: &dyn ResourceConnection,
        id: AccountId,
        balance: Decimal,
    ) -> Result<u64, LedgerError> {
        let rows = connection.update_balance(id, balance)?;
        if rows != 1 {
            error!(account = id, rows, "Balance update affected unexpected row count");
            return Err(LedgerError::data_integrity(id, rows));
        }
        Ok(rows)
    }

    /// Debit `amount` from a locked row
    ///
    /// # Returns
    ///
    /// Number of rows updated
    ///
    /// # Errors
    ///
    /// - `RowNotFound` if the account does not exist
    /// - `InsufficientFunds` if the balance would go negative
    /// - `ArithmeticOverflow` if the new balance is out of range
    pub fn withdraw(
        &self,
        connection: &dyn ResourceConnection,
        id: AccountId,
        amount: Decimal,
    ) -> Result<u64, LedgerError> {
        let account = self.lock_and_read(connection, id)?;
        let balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::arithmetic_overflow(OperationType::Withdraw, id))?;
        if balance < Decimal::ZERO {
            return Err(LedgerError::insufficient_funds(
                OperationType::Withdraw,
                id,
                account.balance,
                amount,
            ));
        }

        debug!(account = id, %amount, %balance, "Withdrawing");
        self.update_balance(connection, id, balance)
    }

    /// Credit `amount` to a locked row
    ///
    /// # Returns
    ///
    /// Number of rows updated
    ///
    /// # Errors
    ///
    /// - `RowNotFound` if the account does not exist
    /// - `ArithmeticOverflow` if the new balance is out of range
    pub fn deposit(
        &self,
        connection: &dyn ResourceConnection,
        id: AccountId,
        amount: Decimal,
    ) -> Result<u64, LedgerError> {
        let account = self.lock_and_read(connection, id)?;
        let balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::arithmetic_overflow(OperationType::Deposit, id))?;

        debug!(account = id, %amount, %balance, "Depositing");
        self.update_balance(connection, id, balance)
    }
}
