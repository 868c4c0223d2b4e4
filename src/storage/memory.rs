//! In-process transactional resource
//!
//! `MemoryStore` plays the role of the relational database behind the
//! ledger: an accounts table, connections with manual transaction control,
//! row-exclusive locks and commit/rollback semantics. It exists so the ledger
//! core can run end to end without a database driver.
//!
//! # Design
//!
//! All shared state (committed rows, row locks, per-connection sessions and
//! injected faults) lives behind a single `parking_lot::Mutex`. Row-lock
//! waiters park on a `Condvar` that is notified whenever a connection commits,
//! rolls back or is released.
//!
//! ```text
//! MemoryStore ── Arc<StoreInner>
//!                   ├── Mutex<StoreState>
//!                   │     ├── accounts   (committed rows)
//!                   │     ├── row_locks  (account -> connection id)
//!                   │     ├── sessions   (connection id -> autocommit + buffered writes)
//!                   │     └── faults
//!                   └── Condvar          (row released)
//! MemoryConnection { id, Arc<StoreInner> }
//! ```
//!
//! # Isolation
//!
//! Plain reads see committed rows overlaid with the reading connection's own
//! buffered writes. Locking reads and updates take the row lock and block
//! other connections wanting the same row until the holder's transaction
//! ends, bounded by [`StoreConfig::row_lock_timeout`].

use crate::core::traits::{ConnectionPool, ResourceConnection};
use crate::types::{Account, AccountId, ResourceError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Configuration for the in-memory resource
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// How long a statement waits for another transaction's row lock
    pub row_lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            row_lock_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    /// Create a new StoreConfig, falling back to the default for a zero timeout
    pub fn new(row_lock_timeout: Duration) -> Self {
        if row_lock_timeout.is_zero() {
            let default = Self::default();
            warn!(
                default_ms = default.row_lock_timeout.as_millis() as u64,
                "Invalid row_lock_timeout (0), using default"
            );
            return default;
        }
        Self { row_lock_timeout }
    }
}

#[derive(Debug, Default)]
struct Session {
    auto_commit: bool,
    pending: BTreeMap<AccountId, Decimal>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_updates: HashSet<AccountId>,
    commits_before_failure: u32,
    failing_commits: u32,
    fail_acquire: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    accounts: BTreeMap<AccountId, Account>,
    row_locks: HashMap<AccountId, u64>,
    sessions: HashMap<u64, Session>,
    faults: Faults,
}

impl StoreState {
    /// Row as seen by `connection`: committed data plus its own buffered write
    fn visible(&self, connection: u64, id: AccountId) -> Option<Account> {
        let mut account = self.accounts.get(&id)?.clone();
        if let Some(balance) = self
            .sessions
            .get(&connection)
            .and_then(|session| session.pending.get(&id))
        {
            account.balance = *balance;
        }
        Some(account)
    }

    fn release_row_locks(&mut self, connection: u64) {
        self.row_locks.retain(|_, holder| *holder != connection);
    }
}

struct StoreInner {
    config: StoreConfig,
    state: Mutex<StoreState>,
    row_released: Condvar,
    next_connection: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// In-memory accounts table with transactional connections
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.inner.config)
            .field("acquired", &self.acquired_connections())
            .field("released", &self.released_connections())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store seeded with `accounts`
    ///
    /// A later account with the same id replaces an earlier one.
    pub fn new(accounts: impl IntoIterator<Item = Account>, config: StoreConfig) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.id, account))
            .collect();

        Self {
            inner: Arc::new(StoreInner {
                config,
                state: Mutex::new(StoreState {
                    accounts,
                    ..StoreState::default()
                }),
                row_released: Condvar::new(),
                next_connection: AtomicU64::new(1),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Create a store with the default configuration
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self::new(accounts, StoreConfig::default())
    }

    /// Committed rows sorted by id
    pub fn snapshot(&self) -> Vec<Account> {
        self.inner.state.lock().accounts.values().cloned().collect()
    }

    /// Committed balance of one account
    pub fn committed_balance(&self, id: AccountId) -> Option<Decimal> {
        self.inner
            .state
            .lock()
            .accounts
            .get(&id)
            .map(|account| account.balance)
    }

    /// Number of connections handed out so far
    pub fn acquired_connections(&self) -> u64 {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    /// Number of connections returned so far
    pub fn released_connections(&self) -> u64 {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Number of connections currently handed out
    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    /// Make every balance update of `id` fail with an injected fault
    pub fn fail_updates_for(&self, id: AccountId) {
        self.inner.state.lock().faults.failing_updates.insert(id);
    }

    /// Make the next `count` commits fail with an injected fault
    pub fn fail_next_commits(&self, count: u32) {
        self.fail_commits_after(0, count);
    }

    /// Let `successes` commits through, then fail the following `count`
    pub fn fail_commits_after(&self, successes: u32, count: u32) {
        let mut state = self.inner.state.lock();
        state.faults.commits_before_failure = successes;
        state.faults.failing_commits = count;
    }

    /// Make `acquire` refuse connections while `enabled`
    pub fn fail_acquire(&self, enabled: bool) {
        self.inner.state.lock().faults.fail_acquire = enabled;
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        self.inner.state.lock().faults = Faults::default();
    }
}

impl ConnectionPool for MemoryStore {
    fn acquire(&self) -> Result<Arc<dyn ResourceConnection>, ResourceError> {
        let mut state = self.inner.state.lock();
        if state.faults.fail_acquire {
            return Err(ResourceError::Unavailable {
                message: "connection acquisition refused".to_string(),
            });
        }

        let id = self.inner.next_connection.fetch_add(1, Ordering::SeqCst);
        state.sessions.insert(
            id,
            Session {
                auto_commit: true,
                pending: BTreeMap::new(),
            },
        );
        drop(state);

        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        trace!(connection = id, "Connection acquired");

        Ok(Arc::new(MemoryConnection {
            id,
            store: Arc::clone(&self.inner),
        }))
    }

    fn release(&self, connection: Arc<dyn ResourceConnection>) {
        let id = connection.id();
        let mut state = self.inner.state.lock();

        let Some(session) = state.sessions.remove(&id) else {
            warn!(connection = id, "Release of a connection that is not open");
            return;
        };
        if !session.pending.is_empty() {
            debug!(
                connection = id,
                rows = session.pending.len(),
                "Discarding uncommitted writes on release"
            );
        }
        state.release_row_locks(id);
        drop(state);

        self.inner.row_released.notify_all();
        self.inner.released.fetch_add(1, Ordering::SeqCst);
        trace!(connection = id, "Connection released");
    }
}

/// Connection handed out by [`MemoryStore`]
pub struct MemoryConnection {
    id: u64,
    store: Arc<StoreInner>,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .finish()
    }
}

impl MemoryConnection {
    fn closed(&self) -> ResourceError {
        ResourceError::ConnectionClosed {
            connection: self.id,
        }
    }

    fn auto_commit(&self, state: &StoreState) -> Result<bool, ResourceError> {
        state
            .sessions
            .get(&self.id)
            .map(|session| session.auto_commit)
            .ok_or_else(|| self.closed())
    }

    /// Wait until no other connection holds the row lock on `account`
    ///
    /// When `retain` is set the lock is recorded against this connection and
    /// kept until its transaction ends.
    fn lock_row(
        &self,
        state: &mut MutexGuard<'_, StoreState>,
        account: AccountId,
        retain: bool,
    ) -> Result<(), ResourceError> {
        let started = Instant::now();
        let deadline = started + self.store.config.row_lock_timeout;

        loop {
            let held_elsewhere =
                matches!(state.row_locks.get(&account), Some(&holder) if holder != self.id);
            if !held_elsewhere {
                if retain {
                    state.row_locks.insert(account, self.id);
                }
                return Ok(());
            }

            if self
                .store
                .row_released
                .wait_until(state, deadline)
                .timed_out()
            {
                let still_held =
                    matches!(state.row_locks.get(&account), Some(&holder) if holder != self.id);
                if still_held {
                    return Err(ResourceError::LockWaitTimeout {
                        account,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }

            // Released while we waited; the session may have gone too
            if !state.sessions.contains_key(&self.id) {
                return Err(self.closed());
            }
        }
    }

    fn apply_pending(&self, state: &mut StoreState) -> Result<usize, ResourceError> {
        if state.faults.commits_before_failure > 0 {
            state.faults.commits_before_failure -= 1;
        } else if state.faults.failing_commits > 0 {
            state.faults.failing_commits -= 1;
            return Err(ResourceError::Injected {
                message: format!("commit failure on connection {}", self.id),
            });
        }

        let pending = match state.sessions.get_mut(&self.id) {
            Some(session) => std::mem::take(&mut session.pending),
            None => return Err(self.closed()),
        };
        let rows = pending.len();
        for (id, balance) in pending {
            if let Some(account) = state.accounts.get_mut(&id) {
                account.balance = balance;
            }
        }
        state.release_row_locks(self.id);
        Ok(rows)
    }
}

impl ResourceConnection for MemoryConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_auto_commit(&self, enabled: bool) -> Result<(), ResourceError> {
        let mut state = self.store.state.lock();
        let was_enabled = self.auto_commit(&state)?;

        // Switching back on commits whatever is in flight
        if enabled && !was_enabled {
            self.apply_pending(&mut state)?;
            drop(state);
            self.store.row_released.notify_all();
            state = self.store.state.lock();
        }

        match state.sessions.get_mut(&self.id) {
            Some(session) => {
                session.auto_commit = enabled;
                Ok(())
            }
            None => Err(self.closed()),
        }
    }

    fn commit(&self) -> Result<(), ResourceError> {
        let mut state = self.store.state.lock();
        let rows = self.apply_pending(&mut state)?;
        drop(state);

        self.store.row_released.notify_all();
        trace!(connection = self.id, rows, "Committed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), ResourceError> {
        let mut state = self.store.state.lock();
        let rows = match state.sessions.get_mut(&self.id) {
            Some(session) => std::mem::take(&mut session.pending).len(),
            None => return Err(self.closed()),
        };
        state.release_row_locks(self.id);
        drop(state);

        self.store.row_released.notify_all();
        trace!(connection = self.id, rows, "Rolled back");
        Ok(())
    }

    fn select_account(&self, id: AccountId) -> Result<Option<Account>, ResourceError> {
        let state = self.store.state.lock();
        self.auto_commit(&state)?;
        Ok(state.visible(self.id, id))
    }

    fn select_account_for_update(&self, id: AccountId) -> Result<Option<Account>, ResourceError> {
        let mut state = self.store.state.lock();
        let auto_commit = self.auto_commit(&state)?;
        if !state.accounts.contains_key(&id) {
            return Ok(None);
        }

        self.lock_row(&mut state, id, !auto_commit)?;
        Ok(state.visible(self.id, id))
    }

    fn update_balance(&self, id: AccountId, balance: Decimal) -> Result<u64, ResourceError> {
        let mut state = self.store.state.lock();
        let auto_commit = self.auto_commit(&state)?;
        if state.faults.failing_updates.contains(&id) {
            return Err(ResourceError::Injected {
                message: format!("update failure on account {}", id),
            });
        }
        if !state.accounts.contains_key(&id) {
            return Ok(0);
        }

        self.lock_row(&mut state, id, !auto_commit)?;

        if auto_commit {
            if let Some(account) = state.accounts.get_mut(&id) {
                account.balance = balance;
            }
        } else if let Some(session) = state.sessions.get_mut(&self.id) {
            session.pending.insert(id, balance);
        }
        Ok(1)
    }

    fn select_all_accounts(&self) -> Result<Vec<Account>, ResourceError> {
        let state = self.store.state.lock();
        self.auto_commit(&state)?;
        Ok(state
            .accounts
            .keys()
            .filter_map(|id| state.visible(self.id, *id))
            .collect())
    }
}
