//! Core traits for the external resource boundary
//!
//! The ledger core never talks to a concrete database. It reaches storage
//! through these two traits: a pool that hands out connections and the
//! connection itself, which supports manual transaction control plus the
//! handful of statements the accessor issues.
//!
//! # Thread Safety
//!
//! Connections are shared through `Arc` between the coordinator's frames and
//! the accessor, so every method takes `&self` and implementations must be
//! `Send + Sync`. A connection is only ever driven by one execution context
//! at a time.

use crate::types::{Account, AccountId, ResourceError};
use rust_decimal::Decimal;
use std::fmt::Debug;
use std::sync::Arc;

/// A connection to the transactional resource
pub trait ResourceConnection: Send + Sync + Debug {
    /// Identifier unique among connections handed out by the same pool
    fn id(&self) -> u64;

    /// Switch automatic per-statement commit on or off
    fn set_auto_commit(&self, enabled: bool) -> Result<(), ResourceError>;

    /// Make the connection's buffered writes durable and release its row locks
    fn commit(&self) -> Result<(), ResourceError>;

    /// Discard the connection's buffered writes and release its row locks
    fn rollback(&self) -> Result<(), ResourceError>;

    /// Plain read of one account row
    fn select_account(&self, id: AccountId) -> Result<Option<Account>, ResourceError>;

    /// Read one account row while taking a row-exclusive lock on it
    ///
    /// The lock is held until the connection's transaction ends.
    fn select_account_for_update(&self, id: AccountId) -> Result<Option<Account>, ResourceError>;

    /// Set the balance of one account row
    ///
    /// # Returns
    ///
    /// Number of rows affected (0 if the row does not exist)
    fn update_balance(&self, id: AccountId, balance: Decimal) -> Result<u64, ResourceError>;

    /// Read every account row
    fn select_all_accounts(&self) -> Result<Vec<Account>, ResourceError>;
}

/// Source of [`ResourceConnection`]s
pub trait ConnectionPool: Send + Sync {
    /// Hand out a connection with autocommit enabled
    fn acquire(&self) -> Result<Arc<dyn ResourceConnection>, ResourceError>;

    /// Return a connection to the pool
    ///
    /// Anything left uncommitted on the connection is rolled back.
    fn release(&self, connection: Arc<dyn ResourceConnection>);
}
