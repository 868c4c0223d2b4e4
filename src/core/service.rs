//! Ledger business operations
//!
//! `LedgerService` implements account reads, withdrawals, deposits and
//! compensated transfers. Its operations are registered with the dispatcher
//! under two services:
//!
//! | Service        | Operation               | Signature           | Propagation           |
//! |----------------|-------------------------|---------------------|-----------------------|
//! | Account        | `get_all_accounts`      | `()`                | REQUIRED (default)    |
//! | Account        | `get_account`           | `(AccountId)`       | REQUIRED (default)    |
//! | Account        | `get_account`           | `(AccountNumber)`   | REQUIRED (default)    |
//! | Account        | `withdraw_from_account` | `(AccountId, Amount)` | REQUIRES_NEW        |
//! | Account        | `deposit_to_account`    | `(AccountId, Amount)` | REQUIRES_NEW        |
//! | FundsTransfer  | `transfer_funds`        | `(Transfer)`        | REQUIRED (service)    |
//!
//! # Transfers
//!
//! A transfer dispatches its withdrawal and deposit as separate REQUIRES_NEW
//! calls, so each leg commits on its own. When the withdrawal has committed
//! and the deposit fails, the amount is deposited back into the source.

use super::accessor::LedgerAccessor;
use super::dispatcher::{
    Arg, ArgKind, Invocation, OperationEntry, OperationRegistry, Output, ServiceKind,
};
use super::lock_manager::KeyLockManager;
use super::traits::ResourceConnection;
use crate::types::{
    Account, AccountId, AccountNumber, LedgerError, OperationType, Propagation, TransferRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const GET_ALL_ACCOUNTS: &str = "get_all_accounts";
pub const GET_ACCOUNT: &str = "get_account";
pub const WITHDRAW_FROM_ACCOUNT: &str = "withdraw_from_account";
pub const DEPOSIT_TO_ACCOUNT: &str = "deposit_to_account";
pub const TRANSFER_FUNDS: &str = "transfer_funds";

/// Account and transfer operations
#[derive(Debug)]
pub struct LedgerService {
    accessor: LedgerAccessor,
    locks: Arc<KeyLockManager<AccountId>>,
}

impl LedgerService {
    pub fn new(locks: Arc<KeyLockManager<AccountId>>) -> Self {
        Self {
            accessor: LedgerAccessor::new(),
            locks,
        }
    }

    fn connection(
        invocation: &Invocation<'_>,
    ) -> Result<Arc<dyn ResourceConnection>, LedgerError> {
        invocation
            .coordinator()
            .current_connection(invocation.context())
    }

    fn fetch_account(
        &self,
        connection: &dyn ResourceConnection,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        self.accessor
            .get_account(connection, id)?
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    pub fn get_all_accounts(
        &self,
        invocation: &mut Invocation<'_>,
    ) -> Result<Vec<Account>, LedgerError> {
        let connection = Self::connection(invocation)?;
        self.accessor.get_all_accounts(connection.as_ref())
    }

    /// # Errors
    ///
    /// `AccountNotFound` if no account has this id
    pub fn get_account(
        &self,
        invocation: &mut Invocation<'_>,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let connection = Self::connection(invocation)?;
        self.fetch_account(connection.as_ref(), id)
    }

    /// # Errors
    ///
    /// `AccountNumberNotFound` if no account has this number
    pub fn get_account_by_number(
        &self,
        invocation: &mut Invocation<'_>,
        account_number: AccountNumber,
    ) -> Result<Account, LedgerError> {
        let connection = Self::connection(invocation)?;
        self.accessor
            .get_account_by_number(connection.as_ref(), account_number)?
            .ok_or(LedgerError::AccountNumberNotFound { account_number })
    }

    /// Debit `amount` from account `id`
    ///
    /// The key lock on `id` is held around the accessor call and released on
    /// every exit path.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `AccountNotFound` if the account does not exist
    /// - `InsufficientFunds` if the balance cannot cover `amount`
    /// - `OperationFailed` if the update did not affect exactly one row
    pub fn withdraw_from_account(
        &self,
        invocation: &mut Invocation<'_>,
        id: AccountId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::invalid_amount(OperationType::Withdraw, amount));
        }

        let connection = Self::connection(invocation)?;
        let account = self.fetch_account(connection.as_ref(), id)?;
        if !account.can_cover(amount) {
            return Err(LedgerError::insufficient_funds(
                OperationType::Withdraw,
                id,
                account.balance,
                amount,
            ));
        }

        let rows = {
            let _guard = self.locks.guard(invocation.context().owner(), account.id);
            self.accessor.withdraw(connection.as_ref(), account.id, amount)
        };
        expect_single_row(OperationType::Withdraw, id, rows)
    }

    /// Credit `amount` to account `id`
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `AccountNotFound` if the account does not exist
    /// - `OperationFailed` if the update did not affect exactly one row
    pub fn deposit_to_account(
        &self,
        invocation: &mut Invocation<'_>,
        id: AccountId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::invalid_amount(OperationType::Deposit, amount));
        }

        let connection = Self::connection(invocation)?;
        let account = self.fetch_account(connection.as_ref(), id)?;

        let rows = {
            let _guard = self.locks.guard(invocation.context().owner(), account.id);
            self.accessor.deposit(connection.as_ref(), account.id, amount)
        };
        expect_single_row(OperationType::Deposit, id, rows)
    }

    /// Move `request.amount` from source to destination
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the amount is not positive; nothing is read
    /// - `AccountNotFound` if either account does not exist
    /// - `InsufficientFunds` if the source cannot cover the amount
    /// - The withdrawal's error if the debit failed
    /// - The deposit's error if the credit failed and the source was restored
    /// - `CompensationFailed` if restoring the source failed too
    pub fn transfer_funds(
        &self,
        invocation: &mut Invocation<'_>,
        request: &TransferRequest,
    ) -> Result<(), LedgerError> {
        let amount = request.amount;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::invalid_amount(OperationType::Transfer, amount));
        }

        let source = invocation
            .dispatch(
                ServiceKind::Account,
                GET_ACCOUNT,
                &[Arg::AccountId(request.source_account_id)],
            )?
            .into_account()?;
        let destination = invocation
            .dispatch(
                ServiceKind::Account,
                GET_ACCOUNT,
                &[Arg::AccountId(request.destination_account_id)],
            )?
            .into_account()?;

        if !source.can_cover(amount) {
            return Err(LedgerError::insufficient_funds(
                OperationType::Transfer,
                source.id,
                source.balance,
                amount,
            ));
        }

        invocation.dispatch(
            ServiceKind::Account,
            WITHDRAW_FROM_ACCOUNT,
            &[Arg::AccountId(source.id), Arg::Amount(amount)],
        )?;

        let deposited = invocation.dispatch(
            ServiceKind::Account,
            DEPOSIT_TO_ACCOUNT,
            &[Arg::AccountId(destination.id), Arg::Amount(amount)],
        );

        if let Err(deposit_error) = deposited {
            warn!(
                source = source.id,
                destination = destination.id,
                %amount,
                error = %deposit_error,
                "Transfer deposit failed after source was debited, crediting source back"
            );

            if let Err(compensation_error) = invocation.dispatch(
                ServiceKind::Account,
                DEPOSIT_TO_ACCOUNT,
                &[Arg::AccountId(source.id), Arg::Amount(amount)],
            ) {
                error!(
                    source = source.id,
                    %amount,
                    error = %compensation_error,
                    "Crediting source back failed, funds remain debited"
                );
                return Err(LedgerError::compensation_failed(
                    source.id,
                    amount,
                    compensation_error.to_string(),
                ));
            }
            return Err(deposit_error);
        }

        info!(
            source = source.id,
            destination = destination.id,
            %amount,
            "Transfer completed"
        );
        Ok(())
    }

    /// Add this service's operations to `registry`
    pub fn register(service: &Arc<LedgerService>, registry: &mut OperationRegistry) {
        registry.declare_service(ServiceKind::Account, None);
        registry.declare_service(ServiceKind::FundsTransfer, Some(Propagation::Required));

        let svc = Arc::clone(service);
        registry.register(
            ServiceKind::Account,
            OperationEntry::new(GET_ALL_ACCOUNTS, vec![], None, move |invocation, _| {
                svc.get_all_accounts(invocation).map(Output::Accounts)
            }),
        );

        let svc = Arc::clone(service);
        registry.register(
            ServiceKind::Account,
            OperationEntry::new(
                GET_ACCOUNT,
                vec![ArgKind::AccountId],
                None,
                move |invocation, args| match args {
                    [Arg::AccountId(id)] => svc.get_account(invocation, *id).map(Output::Account),
                    _ => Err(bad_arguments(GET_ACCOUNT, args)),
                },
            ),
        );

        let svc = Arc::clone(service);
        registry.register(
            ServiceKind::Account,
            OperationEntry::new(
                GET_ACCOUNT,
                vec![ArgKind::AccountNumber],
                None,
                move |invocation, args| match args {
                    [Arg::AccountNumber(number)] => svc
                        .get_account_by_number(invocation, *number)
                        .map(Output::Account),
                    _ => Err(bad_arguments(GET_ACCOUNT, args)),
                },
            ),
        );

        let svc = Arc::clone(service);
        registry.register(
            ServiceKind::Account,
            OperationEntry::new(
                WITHDRAW_FROM_ACCOUNT,
                vec![ArgKind::AccountId, ArgKind::Amount],
                Some(Propagation::RequiresNew),
                move |invocation, args| match args {
                    [Arg::AccountId(id), Arg::Amount(amount)] => svc
                        .withdraw_from_account(invocation, *id, *amount)
                        .map(|_| Output::Unit),
                    _ => Err(bad_arguments(WITHDRAW_FROM_ACCOUNT, args)),
                },
            ),
        );

        let svc = Arc::clone(service);
        registry.register(
            ServiceKind::Account,
            OperationEntry::new(
                DEPOSIT_TO_ACCOUNT,
                vec![ArgKind::AccountId, ArgKind::Amount],
                Some(Propagation::RequiresNew),
                move |invocation, args| match args {
                    [Arg::AccountId(id), Arg::Amount(amount)] => svc
                        .deposit_to_account(invocation, *id, *amount)
                        .map(|_| Output::Unit),
                    _ => Err(bad_arguments(DEPOSIT_TO_ACCOUNT, args)),
                },
            ),
        );

        let svc = Arc::clone(service);
        registry.register(
            ServiceKind::FundsTransfer,
            OperationEntry::new(
                TRANSFER_FUNDS,
                vec![ArgKind::Transfer],
                None,
                move |invocation, args| match args {
                    [Arg::Transfer(request)] => svc
                        .transfer_funds(invocation, request)
                        .map(|_| Output::Unit),
                    _ => Err(bad_arguments(TRANSFER_FUNDS, args)),
                },
            ),
        );
    }
}

fn expect_single_row(
    operation: OperationType,
    id: AccountId,
    rows: Result<u64, LedgerError>,
) -> Result<(), LedgerError> {
    match rows {
        Ok(1) => Ok(()),
        Ok(rows) => Err(LedgerError::operation_failed(
            operation,
            id,
            format!("{} rows affected", rows),
        )),
        Err(e @ LedgerError::DataIntegrity { .. }) => {
            Err(LedgerError::operation_failed(operation, id, e.to_string()))
        }
        Err(e) => Err(e),
    }
}

fn bad_arguments(operation: &str, args: &[Arg]) -> LedgerError {
    LedgerError::service(format!("{} received arguments {:?}", operation, args))
}
