//! Per-key reentrant locking
//!
//! `KeyLockManager` serializes critical sections by logical key (an account
//! id, typically) rather than by a global mutex, so work on different keys
//! proceeds in parallel.
//!
//! # Design
//!
//! Each key maps to one `ReentrantKeyLock`, created on first use and kept for
//! the lifetime of the manager. A lock is owned by a [`LockOwner`] token (one
//! per execution context) and may be re-acquired by its owner; it is released
//! when the owner has unlocked it as many times as it locked it.
//!
//! Acquiring several keys at once goes through [`KeyLockManager::lock_all_or_nothing`]:
//! each key is tried without blocking and, on the first miss, every key
//! taken in that attempt is released before retrying. A caller of
//! `lock_all_or_nothing` therefore never blocks while holding part of a key
//! set, which rules out lock-order deadlocks between overlapping sets.
//!
//! [`KeyLockManager::lock_all_or_nothing_with_timeout`] instead waits on each
//! key in turn while holding the ones already taken, bounded by one shared
//! deadline. Overlapping sets can stall each other until that deadline, after
//! which every key taken by the timed-out call is released.
//!
//! # Thread Safety
//!
//! The key map is a `DashMap`; each lock is a `parking_lot` mutex/condvar
//! pair. The manager is shared behind an `Arc`.

use crate::types::LedgerError;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Identity of a lock holder
///
/// Every execution context gets its own token; reentrancy is decided by
/// comparing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(u64);

impl LockOwner {
    /// Allocate a process-unique owner token
    pub fn next() -> Self {
        static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);
        LockOwner(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Retry pacing for multi-key acquisition
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Pause after the first failed attempt
    pub backoff_initial: Duration,
    /// Upper bound for the pause between attempts
    pub backoff_max: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_micros(1),
            backoff_max: Duration::from_millis(1),
        }
    }
}

impl LockConfig {
    /// Create a new LockConfig
    ///
    /// A zero initial pause falls back to the default; a maximum below the
    /// initial pause is raised to it.
    pub fn new(backoff_initial: Duration, backoff_max: Duration) -> Self {
        let backoff_initial = if backoff_initial.is_zero() {
            let default = Self::default().backoff_initial;
            warn!(
                default_us = default.as_micros() as u64,
                "Invalid backoff_initial (0), using default"
            );
            default
        } else {
            backoff_initial
        };

        Self {
            backoff_initial,
            backoff_max: backoff_max.max(backoff_initial),
        }
    }
}

#[derive(Debug, Default)]
struct Holder {
    owner: Option<LockOwner>,
    depth: u32,
}

#[derive(Debug, Default)]
struct ReentrantKeyLock {
    holder: Mutex<Holder>,
    released: Condvar,
}

impl ReentrantKeyLock {
    fn lock(&self, owner: LockOwner) {
        let mut holder = self.holder.lock();
        loop {
            match holder.owner {
                None => {
                    holder.owner = Some(owner);
                    holder.depth = 1;
                    return;
                }
                Some(current) if current == owner => {
                    holder.depth += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut holder),
            }
        }
    }

    /// Try to take the lock, waiting at most until `deadline`
    ///
    /// With no deadline the attempt does not block.
    fn try_lock_until(&self, owner: LockOwner, deadline: Option<Instant>) -> bool {
        let mut holder = self.holder.lock();
        loop {
            match holder.owner {
                None => {
                    holder.owner = Some(owner);
                    holder.depth = 1;
                    return true;
                }
                Some(current) if current == owner => {
                    holder.depth += 1;
                    return true;
                }
                Some(_) => {
                    let Some(deadline) = deadline else {
                        return false;
                    };
                    if self.released.wait_until(&mut holder, deadline).timed_out()
                        && holder.owner.is_some()
                        && holder.owner != Some(owner)
                    {
                        return false;
                    }
                }
            }
        }
    }

    /// Returns false if `owner` does not hold the lock
    fn unlock(&self, owner: LockOwner) -> bool {
        let mut holder = self.holder.lock();
        if holder.owner != Some(owner) {
            return false;
        }

        holder.depth -= 1;
        if holder.depth == 0 {
            holder.owner = None;
            drop(holder);
            self.released.notify_one();
        }
        true
    }

    fn is_locked(&self) -> bool {
        self.holder.lock().owner.is_some()
    }

    fn is_held_by(&self, owner: LockOwner) -> bool {
        self.holder.lock().owner == Some(owner)
    }
}

/// Registry of per-key reentrant locks
///
/// Lock entries are never evicted; the map grows with the set of keys ever
/// locked.
#[derive(Debug)]
pub struct KeyLockManager<K>
where
    K: Eq + Hash,
{
    locks: DashMap<K, Arc<ReentrantKeyLock>>,
    config: LockConfig,
}

impl<K> Default for KeyLockManager<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl<K> KeyLockManager<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create an empty lock manager
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: DashMap::new(),
            config,
        }
    }

    fn entry(&self, key: &K) -> Arc<ReentrantKeyLock> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(key.clone()).or_default().value())
    }

    /// Block until `owner` holds the lock for `key`
    ///
    /// Reentrant: an owner that already holds the key gets it again and must
    /// unlock it once more.
    pub fn lock(&self, owner: LockOwner, key: &K) {
        trace!(owner = owner.id(), key = ?key, "Locking key");
        self.entry(key).lock(owner);
    }

    /// Try to lock `key`, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `timeout` is zero
    /// - `LockTimeout` if the key is still held by another owner after `timeout`
    pub fn try_lock_for(
        &self,
        owner: LockOwner,
        key: &K,
        timeout: Duration,
    ) -> Result<(), LedgerError> {
        if timeout.is_zero() {
            return Err(LedgerError::invalid_argument(
                "lock timeout must be greater than zero",
            ));
        }

        let deadline = Instant::now() + timeout;
        if self.entry(key).try_lock_until(owner, Some(deadline)) {
            Ok(())
        } else {
            debug!(owner = owner.id(), key = ?key, ?timeout, "Timed out locking key");
            Err(LedgerError::lock_timeout(
                format!("{:?}", key),
                timeout.as_millis() as u64,
            ))
        }
    }

    /// Release one hold of `key`
    ///
    /// # Errors
    ///
    /// `LockNotHeld` if `owner` does not hold the key
    pub fn unlock(&self, owner: LockOwner, key: &K) -> Result<(), LedgerError> {
        let held = self
            .locks
            .get(key)
            .map(|lock| Arc::clone(lock.value()))
            .is_some_and(|lock| lock.unlock(owner));

        if held {
            trace!(owner = owner.id(), key = ?key, "Unlocked key");
            Ok(())
        } else {
            error!(owner = owner.id(), key = ?key, "Unlock of a key not held by caller");
            Err(LedgerError::LockNotHeld {
                keys: vec![format!("{:?}", key)],
            })
        }
    }

    /// Take one attempt at every key, releasing the partial set on a miss
    fn try_lock_set(&self, owner: LockOwner, keys: &[K], deadline: Option<Instant>) -> bool {
        for (taken, key) in keys.iter().enumerate() {
            if !self.entry(key).try_lock_until(owner, deadline) {
                for key in keys[..taken].iter().rev() {
                    if let Some(lock) = self.locks.get(key) {
                        lock.value().unlock(owner);
                    }
                }
                return false;
            }
        }
        true
    }

    /// Block until `owner` holds every key in `keys`
    ///
    /// Never blocks while holding a strict subset of the keys: on any miss the
    /// keys taken so far are released (in reverse order) and the whole set is
    /// retried after a bounded exponential pause.
    pub fn lock_all_or_nothing(&self, owner: LockOwner, keys: &[K]) {
        let mut backoff = self.config.backoff_initial;
        let mut attempts: u64 = 1;

        while !self.try_lock_set(owner, keys, None) {
            thread::sleep(backoff);
            backoff = (backoff * 2).min(self.config.backoff_max);
            attempts += 1;
        }

        if attempts > 1 {
            debug!(owner = owner.id(), keys = ?keys, attempts, "Acquired key set after retries");
        }
    }

    /// Try to lock every key in `keys` before `timeout` elapses
    ///
    /// Keys are taken in order, waiting on each one while holding those
    /// already taken. All keys share one deadline measured from the call. On
    /// expiry every key taken by this call is released.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `timeout` is zero
    /// - `LockTimeout` if the set could not be acquired in time
    pub fn lock_all_or_nothing_with_timeout(
        &self,
        owner: LockOwner,
        timeout: Duration,
        keys: &[K],
    ) -> Result<(), LedgerError> {
        if timeout.is_zero() {
            return Err(LedgerError::invalid_argument(
                "lock timeout must be greater than zero",
            ));
        }

        let deadline = Instant::now() + timeout;
        if self.try_lock_set(owner, keys, Some(deadline)) {
            Ok(())
        } else {
            debug!(owner = owner.id(), keys = ?keys, ?timeout, "Timed out locking key set");
            Err(LedgerError::lock_timeout(
                format!("{:?}", keys),
                timeout.as_millis() as u64,
            ))
        }
    }

    /// Release one hold of every key in `keys`
    ///
    /// Best effort: every key the owner holds is released even when some are
    /// not held.
    ///
    /// # Errors
    ///
    /// `LockNotHeld` listing the keys `owner` did not hold
    pub fn unlock_all(&self, owner: LockOwner, keys: &[K]) -> Result<(), LedgerError> {
        let not_held: Vec<String> = keys
            .iter()
            .filter(|key| {
                !self
                    .locks
                    .get(*key)
                    .map(|lock| Arc::clone(lock.value()))
                    .is_some_and(|lock| lock.unlock(owner))
            })
            .map(|key| format!("{:?}", key))
            .collect();

        if not_held.is_empty() {
            Ok(())
        } else {
            error!(owner = owner.id(), keys = ?not_held, "Unlock of keys not held by caller");
            Err(LedgerError::LockNotHeld { keys: not_held })
        }
    }

    /// Lock `key` and release it when the guard drops
    pub fn guard(&self, owner: LockOwner, key: K) -> KeyLockGuard<'_, K> {
        self.lock(owner, &key);
        KeyLockGuard {
            manager: self,
            owner,
            keys: vec![key],
        }
    }

    /// Lock every key in `keys` all-or-nothing and release them when the guard drops
    pub fn guard_all(&self, owner: LockOwner, keys: Vec<K>) -> KeyLockGuard<'_, K> {
        self.lock_all_or_nothing(owner, &keys);
        KeyLockGuard {
            manager: self,
            owner,
            keys,
        }
    }

    /// Whether any owner currently holds `key`
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.value().is_locked())
    }

    /// Whether `owner` currently holds `key`
    pub fn is_held_by(&self, owner: LockOwner, key: &K) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.value().is_held_by(owner))
    }

    /// Number of keys that have ever been locked
    pub fn tracked_keys(&self) -> usize {
        self.locks.len()
    }
}

/// Holds one or more keys until dropped
#[must_use = "the keys are released as soon as the guard is dropped"]
pub struct KeyLockGuard<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    manager: &'a KeyLockManager<K>,
    owner: LockOwner,
    keys: Vec<K>,
}

impl<K> Drop for KeyLockGuard<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        if let Err(e) = self.manager.unlock_all(self.owner, &self.keys) {
            error!(error = %e, "Failed to release guarded keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_owner_tokens_are_unique() {
        let a = LockOwner::next();
        let b = LockOwner::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_lock_unlock_lifecycle() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();

        manager.lock(owner, &1);
        assert!(manager.is_locked(&1));
        assert!(manager.is_held_by(owner, &1));

        manager.unlock(owner, &1).unwrap();
        assert!(!manager.is_locked(&1));
    }

    #[test]
    fn test_reentrant_lock_needs_matching_unlocks() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();

        manager.lock(owner, &7);
        manager.lock(owner, &7);
        manager.unlock(owner, &7).unwrap();
        assert!(manager.is_locked(&7));

        manager.unlock(owner, &7).unwrap();
        assert!(!manager.is_locked(&7));
    }

    #[test]
    fn test_unlock_not_held() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();
        let other = LockOwner::next();

        // Never locked
        assert!(matches!(
            manager.unlock(owner, &1),
            Err(LedgerError::LockNotHeld { .. })
        ));

        // Held by someone else
        manager.lock(other, &1);
        assert!(matches!(
            manager.unlock(owner, &1),
            Err(LedgerError::LockNotHeld { .. })
        ));
        assert!(manager.is_held_by(other, &1));
    }

    #[test]
    fn test_try_lock_for_zero_timeout_rejected() {
        let manager = KeyLockManager::<u64>::default();
        let result = manager.try_lock_for(LockOwner::next(), &1, Duration::ZERO);
        assert!(matches!(result, Err(LedgerError::InvalidArgument { .. })));
    }

    #[test]
    fn test_try_lock_for_times_out_when_contended() {
        let manager = KeyLockManager::<u64>::default();
        let holder = LockOwner::next();
        manager.lock(holder, &1);

        let started = Instant::now();
        let result = manager.try_lock_for(LockOwner::next(), &1, Duration::from_millis(30));

        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_try_lock_for_succeeds_when_free() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();
        manager
            .try_lock_for(owner, &1, Duration::from_millis(10))
            .unwrap();
        assert!(manager.is_held_by(owner, &1));
    }

    #[test]
    fn test_lock_all_or_nothing_with_timeout_releases_partial_set() {
        let manager = KeyLockManager::<u64>::default();
        let holder = LockOwner::next();
        let caller = LockOwner::next();
        manager.lock(holder, &3);

        let result =
            manager.lock_all_or_nothing_with_timeout(caller, Duration::from_millis(20), &[1, 2, 3]);

        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        assert!(!manager.is_locked(&1));
        assert!(!manager.is_locked(&2));
        assert!(manager.is_held_by(holder, &3));
    }

    #[test]
    fn test_lock_all_or_nothing_with_timeout_zero_rejected() {
        let manager = KeyLockManager::<u64>::default();
        let result = manager.lock_all_or_nothing_with_timeout(LockOwner::next(), Duration::ZERO, &[1]);
        assert!(matches!(result, Err(LedgerError::InvalidArgument { .. })));
    }

    #[test]
    fn test_unlock_all_is_best_effort() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();
        manager.lock_all_or_nothing(owner, &[1, 2]);

        let result = manager.unlock_all(owner, &[1, 9, 2]);

        match result {
            Err(LedgerError::LockNotHeld { keys }) => assert_eq!(keys, vec!["9".to_string()]),
            other => panic!("expected LockNotHeld, got {:?}", other),
        }
        assert!(!manager.is_locked(&1));
        assert!(!manager.is_locked(&2));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();
        {
            let _guard = manager.guard_all(owner, vec![4, 5]);
            assert!(manager.is_held_by(owner, &4));
            assert!(manager.is_held_by(owner, &5));
        }
        assert!(!manager.is_locked(&4));
        assert!(!manager.is_locked(&5));
    }

    #[test]
    fn test_lock_blocks_other_owner_until_release() {
        let manager = Arc::new(KeyLockManager::<u64>::default());
        let holder = LockOwner::next();
        manager.lock(holder, &1);

        let (tx, rx) = mpsc::channel();
        let waiter_manager = Arc::clone(&manager);
        let waiter = thread::spawn(move || {
            let owner = LockOwner::next();
            waiter_manager.lock(owner, &1);
            tx.send(()).unwrap();
            waiter_manager.unlock(owner, &1).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        manager.unlock(holder, &1).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        waiter.join().unwrap();
    }

    #[rstest]
    #[case::disjoint(vec![1, 2], vec![3, 4])]
    #[case::overlapping(vec![1, 2, 3], vec![3, 2, 1])]
    #[case::shared_middle(vec![1, 5, 9], vec![9, 5, 2])]
    fn test_lock_all_or_nothing_concurrent_sets_complete(
        #[case] first: Vec<u64>,
        #[case] second: Vec<u64>,
    ) {
        let manager = Arc::new(KeyLockManager::<u64>::default());
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for keys in [first, second] {
            for _ in 0..4 {
                let manager = Arc::clone(&manager);
                let completed = Arc::clone(&completed);
                let keys = keys.clone();
                handles.push(thread::spawn(move || {
                    let owner = LockOwner::next();
                    for _ in 0..200 {
                        manager.lock_all_or_nothing(owner, &keys);
                        manager.unlock_all(owner, &keys).unwrap();
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_lock_map_grows_monotonically() {
        let manager = KeyLockManager::<u64>::default();
        let owner = LockOwner::next();
        for key in 0..10 {
            manager.lock(owner, &key);
            manager.unlock(owner, &key).unwrap();
        }
        assert_eq!(manager.tracked_keys(), 10);
    }

    #[test]
    fn test_lock_config_clamps_max() {
        let config = LockConfig::new(Duration::from_millis(2), Duration::from_micros(5));
        assert_eq!(config.backoff_max, Duration::from_millis(2));

        let config = LockConfig::new(Duration::ZERO, Duration::from_millis(1));
        assert_eq!(config.backoff_initial, LockConfig::default().backoff_initial);
    }
}
