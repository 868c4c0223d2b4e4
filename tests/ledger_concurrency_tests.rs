//! Concurrency and transaction-boundary tests against the public ledger API
//!
//! Every test builds a fresh `MemoryStore` and drives it through `Ledger`
//! from several threads, each with its own `TransactionContext`.

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rust_decimal::Decimal;
    use rust_funds_transfer::core::{KeyLockManager, Ledger, LockConfig, LockOwner};
    use rust_funds_transfer::storage::{MemoryStore, StoreConfig};
    use rust_funds_transfer::types::{
        Account, AccountId, ErrorCategory, LedgerError, Propagation, ResourceError,
        TransferRequest,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn ledger_with(balances: &[i64]) -> (MemoryStore, Ledger) {
        let accounts = balances.iter().enumerate().map(|(index, balance)| {
            let id = index as AccountId + 1;
            Account::new(id, 1000 + id, format!("Account {}", id), Decimal::new(*balance, 0))
        });
        let store = MemoryStore::new(accounts, StoreConfig::new(Duration::from_secs(30)));
        let ledger = Ledger::new(
            Arc::new(store.clone()),
            LockConfig::new(Duration::from_micros(1), Duration::from_millis(1)),
        );
        (store, ledger)
    }

    fn total(store: &MemoryStore) -> Decimal {
        store.snapshot().iter().map(|account| account.balance).sum()
    }

    #[test]
    fn test_concurrent_deposits_are_all_applied() {
        let (store, ledger) = ledger_with(&[2_500]);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    let mut ctx = ledger.new_context();
                    for _ in 0..100 {
                        ledger
                            .deposit_to_account(&mut ctx, 1, Decimal::new(100, 0))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.committed_balance(1), Some(Decimal::new(102_500, 0)));
        assert_eq!(store.open_connections(), 0);
    }

    #[test]
    fn test_concurrent_withdrawals_never_overdraw() {
        let (store, ledger) = ledger_with(&[65_000]);
        let succeeded = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                let succeeded = Arc::clone(&succeeded);
                let rejected = Arc::clone(&rejected);
                thread::spawn(move || {
                    let mut ctx = ledger.new_context();
                    for _ in 0..100 {
                        match ledger.withdraw_from_account(&mut ctx, 1, Decimal::new(100, 0)) {
                            Ok(()) => succeeded.fetch_add(1, Ordering::SeqCst),
                            Err(LedgerError::InsufficientFunds { .. }) => {
                                rejected.fetch_add(1, Ordering::SeqCst)
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(succeeded.load(Ordering::SeqCst), 650);
        assert_eq!(rejected.load(Ordering::SeqCst), 350);
        assert_eq!(store.committed_balance(1), Some(Decimal::ZERO));
    }

    #[test]
    fn test_random_transfers_conserve_total() {
        let (store, ledger) = ledger_with(&[1000, 1000, 1000, 1000, 1000]);
        let before = total(&store);

        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    let mut ctx = ledger.new_context();
                    // Deterministic pseudo-random walk over account pairs and amounts
                    let mut state = worker * 7919 + 17;
                    for _ in 0..200 {
                        state = state
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(1442695040888963407);
                        let source = (state >> 33) % 5 + 1;
                        let destination = (state >> 17) % 5 + 1;
                        let amount = Decimal::new(((state >> 40) % 500 + 1) as i64, 0);
                        let request = TransferRequest::new(source, destination, amount);
                        match ledger.transfer_funds(&mut ctx, &request) {
                            Ok(()) | Err(LedgerError::InsufficientFunds { .. }) => {}
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(total(&store), before);
        assert!(store
            .snapshot()
            .iter()
            .all(|account| account.balance >= Decimal::ZERO));
        assert_eq!(store.open_connections(), 0);
    }

    #[rstest]
    #[case::same_order(vec![vec![1, 2, 3], vec![1, 2, 3]])]
    #[case::reversed(vec![vec![1, 2, 3], vec![3, 2, 1]])]
    #[case::rotated(vec![vec![1, 2, 3], vec![2, 3, 1], vec![3, 1, 2]])]
    fn test_overlapping_key_sets_do_not_deadlock(#[case] orders: Vec<Vec<u32>>) {
        let locks = Arc::new(KeyLockManager::<u32>::new(LockConfig::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        for keys in orders.clone() {
            for _ in 0..4 {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                let keys = keys.clone();
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    let owner = LockOwner::next();
                    for _ in 0..200 {
                        let _guard = locks.guard_all(owner, keys.clone());
                        let seen = counter.load(Ordering::SeqCst);
                        counter.store(seen + 1, Ordering::SeqCst);
                    }
                    done_tx.send(()).unwrap();
                });
            }
        }
        drop(done_tx);

        for _ in 0..orders.len() * 4 {
            done_rx
                .recv_timeout(Duration::from_secs(30))
                .expect("workers deadlocked");
        }
        // The load/store pair above is only race-free under mutual exclusion
        assert_eq!(counter.load(Ordering::SeqCst), orders.len() * 4 * 200);
        assert!(!locks.is_locked(&1));
    }

    #[test]
    fn test_lock_timeout_is_retryable() {
        let (_store, ledger) = ledger_with(&[10]);
        let locks = Arc::clone(ledger.lock_manager());
        let holder = LockOwner::next();
        locks.lock(holder, &1);

        let err = thread::spawn(move || {
            locks
                .try_lock_for(LockOwner::next(), &1, Duration::from_millis(20))
                .unwrap_err()
        })
        .join()
        .unwrap();

        assert!(matches!(err, LedgerError::LockTimeout { .. }));
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.is_retryable());
        ledger.lock_manager().unlock(holder, &1).unwrap();
    }

    #[test]
    fn test_requires_new_commits_independently_of_outer_rollback() {
        let (store, ledger) = ledger_with(&[100]);
        let coordinator = Arc::clone(ledger.dispatcher().coordinator());
        let mut ctx = ledger.new_context();

        coordinator.begin(&mut ctx, Propagation::Required).unwrap();
        ledger
            .withdraw_from_account(&mut ctx, 1, Decimal::new(40, 0))
            .unwrap();
        // REQUIRED read joins the outer frame and sees the committed withdrawal
        let account = ledger.get_account(&mut ctx, 1).unwrap();
        assert_eq!(account.balance, Decimal::new(60, 0));
        assert_eq!(ctx.depth(), 1);
        coordinator.end(&mut ctx, false).unwrap();

        assert_eq!(store.committed_balance(1), Some(Decimal::new(60, 0)));
        assert_eq!(store.acquired_connections(), 2);
        assert_eq!(store.open_connections(), 0);
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_failed_deposit_is_compensated() {
        let (store, ledger) = ledger_with(&[500, 0]);
        store.fail_updates_for(2);
        let mut ctx = ledger.new_context();

        let err = ledger
            .transfer_funds(&mut ctx, &TransferRequest::new(1, 2, Decimal::new(200, 0)))
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Resource(ResourceError::Injected { .. })
        ));
        assert_eq!(store.committed_balance(1), Some(Decimal::new(500, 0)));
        assert_eq!(store.committed_balance(2), Some(Decimal::ZERO));
        assert!(!ledger.lock_manager().is_locked(&1));
        assert!(!ledger.lock_manager().is_locked(&2));
    }

    #[test]
    fn test_failed_compensation_is_reported() {
        let (store, ledger) = ledger_with(&[500, 0]);
        store.fail_updates_for(2);
        // The withdrawal commits; the compensating deposit does not
        store.fail_commits_after(1, 1);
        let mut ctx = ledger.new_context();

        let err = ledger
            .transfer_funds(&mut ctx, &TransferRequest::new(1, 2, Decimal::new(100, 0)))
            .unwrap_err();

        assert!(matches!(err, LedgerError::CompensationFailed { .. }));
        assert_eq!(store.committed_balance(1), Some(Decimal::new(400, 0)));
        assert_eq!(store.open_connections(), 0);
    }

    #[rstest]
    #[case::negative(Decimal::new(-5, 0))]
    #[case::zero(Decimal::ZERO)]
    fn test_non_positive_transfer_is_rejected(#[case] amount: Decimal) {
        let (store, ledger) = ledger_with(&[100, 100]);
        let mut ctx = ledger.new_context();

        let err = ledger
            .transfer_funds(&mut ctx, &TransferRequest::new(1, 2, amount))
            .unwrap_err();

        assert_eq!(err.reason_code(), Some("303"));
        assert_eq!(store.committed_balance(1), Some(Decimal::new(100, 0)));
        assert_eq!(store.committed_balance(2), Some(Decimal::new(100, 0)));
    }
}
