//! Ledger facade
//!
//! `Ledger` wires the lock manager, transaction coordinator, service and
//! dispatcher together once and exposes typed entry points. Every entry
//! point routes through the dispatcher, so each call gets the transaction
//! boundary declared for its operation.
//!
//! # Architecture
//!
//! ```text
//! Ledger
//!     ├── Arc<ServiceDispatcher>
//!     │       ├── Arc<TransactionCoordinator> ── Arc<dyn ConnectionPool>
//!     │       └── OperationRegistry ── Arc<LedgerService>
//!     └── Arc<KeyLockManager<AccountId>>
//! ```
//!
//! # Thread Safety
//!
//! `Ledger` is cheap to clone and may be shared across threads. Each thread
//! (or task) must use its own [`TransactionContext`] from [`Ledger::new_context`].

use super::coordinator::{TransactionContext, TransactionCoordinator};
use super::dispatcher::{Arg, OperationRegistry, ServiceDispatcher, ServiceKind};
use super::lock_manager::{KeyLockManager, LockConfig};
use super::service::{self, LedgerService};
use super::traits::ConnectionPool;
use crate::types::{
    Account, AccountId, AccountNumber, LedgerError, OperationRecord, OperationType,
    TransferRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Typed entry points to the ledger operations
#[derive(Debug, Clone)]
pub struct Ledger {
    dispatcher: Arc<ServiceDispatcher>,
    locks: Arc<KeyLockManager<AccountId>>,
}

impl Ledger {
    /// Build a ledger over `pool`
    pub fn new(pool: Arc<dyn ConnectionPool>, lock_config: LockConfig) -> Self {
        let locks = Arc::new(KeyLockManager::new(lock_config));
        let coordinator = Arc::new(TransactionCoordinator::new(pool));

        let service = Arc::new(LedgerService::new(Arc::clone(&locks)));
        let mut registry = OperationRegistry::new();
        LedgerService::register(&service, &mut registry);

        Self {
            dispatcher: Arc::new(ServiceDispatcher::new(coordinator, registry)),
            locks,
        }
    }

    /// Build a ledger over `pool` with the default lock configuration
    pub fn with_pool(pool: Arc<dyn ConnectionPool>) -> Self {
        Self::new(pool, LockConfig::default())
    }

    /// Fresh transaction context for one execution context
    pub fn new_context(&self) -> TransactionContext {
        TransactionContext::new()
    }

    pub fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.dispatcher
    }

    pub fn lock_manager(&self) -> &Arc<KeyLockManager<AccountId>> {
        &self.locks
    }

    pub fn get_all_accounts(
        &self,
        ctx: &mut TransactionContext,
    ) -> Result<Vec<Account>, LedgerError> {
        self.dispatcher
            .dispatch(ctx, ServiceKind::Account, service::GET_ALL_ACCOUNTS, &[])?
            .into_accounts()
    }

    pub fn get_account(
        &self,
        ctx: &mut TransactionContext,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        self.dispatcher
            .dispatch(
                ctx,
                ServiceKind::Account,
                service::GET_ACCOUNT,
                &[Arg::AccountId(id)],
            )?
            .into_account()
    }

    pub fn get_account_by_number(
        &self,
        ctx: &mut TransactionContext,
        account_number: AccountNumber,
    ) -> Result<Account, LedgerError> {
        self.dispatcher
            .dispatch(
                ctx,
                ServiceKind::Account,
                service::GET_ACCOUNT,
                &[Arg::AccountNumber(account_number)],
            )?
            .into_account()
    }

    pub fn withdraw_from_account(
        &self,
        ctx: &mut TransactionContext,
        id: AccountId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.dispatcher
            .dispatch(
                ctx,
                ServiceKind::Account,
                service::WITHDRAW_FROM_ACCOUNT,
                &[Arg::AccountId(id), Arg::Amount(amount)],
            )?
            .into_unit()
    }

    pub fn deposit_to_account(
        &self,
        ctx: &mut TransactionContext,
        id: AccountId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.dispatcher
            .dispatch(
                ctx,
                ServiceKind::Account,
                service::DEPOSIT_TO_ACCOUNT,
                &[Arg::AccountId(id), Arg::Amount(amount)],
            )?
            .into_unit()
    }

    pub fn transfer_funds(
        &self,
        ctx: &mut TransactionContext,
        request: &TransferRequest,
    ) -> Result<(), LedgerError> {
        self.dispatcher
            .dispatch(
                ctx,
                ServiceKind::FundsTransfer,
                service::TRANSFER_FUNDS,
                &[Arg::Transfer(request.clone())],
            )?
            .into_unit()
    }

    /// Apply one operation read from batch input
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a transfer without a destination, otherwise
    /// whatever the operation returns
    pub fn apply(
        &self,
        ctx: &mut TransactionContext,
        record: &OperationRecord,
    ) -> Result<(), LedgerError> {
        match record.op_type {
            OperationType::Withdraw => {
                self.withdraw_from_account(ctx, record.account, record.amount)
            }
            OperationType::Deposit => self.deposit_to_account(ctx, record.account, record.amount),
            OperationType::Transfer => {
                let destination = record.destination.ok_or_else(|| {
                    LedgerError::invalid_argument(format!(
                        "transfer from account {} has no destination",
                        record.account
                    ))
                })?;
                self.transfer_funds(
                    ctx,
                    &TransferRequest::new(record.account, destination, record.amount),
                )
            }
        }
    }
}
