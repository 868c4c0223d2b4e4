//! Core ledger module
//!
//! This module contains the ledger's processing components:
//! - `traits` - Resource connection and pool abstractions
//! - `lock_manager` - Per-key reentrant locks with all-or-nothing acquisition
//! - `coordinator` - Nested transactions under propagation policies
//! - `dispatcher` - Operation registry and transactional dispatch
//! - `accessor` - Account row statements on the active connection
//! - `service` - Withdraw, deposit and compensated transfer operations
//! - `ledger` - Typed facade over the dispatcher

pub mod accessor;
pub mod coordinator;
pub mod dispatcher;
pub mod ledger;
pub mod lock_manager;
pub mod service;
pub mod traits;

pub use accessor::LedgerAccessor;
pub use coordinator::{TransactionContext, TransactionCoordinator};
pub use dispatcher::{
    Arg, ArgKind, Invocation, OperationEntry, OperationRegistry, Output, ServiceDispatcher,
    ServiceKind,
};
pub use ledger::Ledger;
pub use lock_manager::{KeyLockGuard, KeyLockManager, LockConfig, LockOwner};
pub use service::LedgerService;
pub use traits::{ConnectionPool, ResourceConnection};
