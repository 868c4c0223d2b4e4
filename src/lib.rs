//! Rust Funds Transfer Library
//! # Overview
//!
//! A funds-transfer ledger: account balances, withdrawals, deposits and
//! transfers that stay consistent under concurrent callers, with
//! transaction boundaries applied declaratively by a dispatch layer.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Account, OperationRecord, LedgerError, etc.)
//! - [`core`] - The transaction substrate and business logic:
//!   - [`core::lock_manager`] - Per-key reentrant locks with all-or-nothing acquisition
//!   - [`core::coordinator`] - REQUIRED / REQUIRES_NEW transaction frames over pooled connections
//!   - [`core::dispatcher`] - Operation registry, overload resolution and transaction interception
//!   - [`core::accessor`] - Row-level reads and balance updates
//!   - [`core::service`] - Withdraw, deposit and transfer with compensation
//!   - [`core::ledger`] - Typed entry points routed through the dispatcher
//! - [`storage`] - In-memory relational resource implementing the connection traits
//! - [`io`] - CSV formats for account snapshots and operation files
//! - [`strategy`] - Sync and async batch drivers over an operations file
//! - [`cli`] - CLI arguments parsing
//! - [`logging`] - tracing subscriber setup
//!
//! # Operations
//!
//! - **Withdraw**: Debit an account in its own transaction (requires sufficient balance)
//! - **Deposit**: Credit an account in its own transaction
//! - **Transfer**: Withdraw then deposit; a failed deposit is compensated by
//!   re-crediting the source account

// Module declarations
pub mod cli;
pub mod core;
pub mod io;
pub mod logging;
pub mod storage;
pub mod strategy;
pub mod types;

pub use core::{KeyLockManager, Ledger, TransactionContext};
pub use io::write_accounts_csv;
pub use storage::MemoryStore;
pub use types::{
    Account, AccountId, AccountNumber, LedgerError, OperationRecord, OperationType, Propagation,
    TransferRequest,
};
