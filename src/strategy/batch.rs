//! Batch processing with account-based partitioning
//!
//! `BatchProcessor` splits a batch by the account each operation is issued
//! against. Partitions run concurrently on the blocking pool, each with its
//! own transaction context; operations inside a partition keep file order.
//!
//! Transfers touch a second account outside their partition. The key locks
//! and row locks in the ledger keep those cross-partition updates atomic,
//! but their relative order against other partitions is not fixed.

use std::collections::HashMap;

use tracing::error;

use crate::core::Ledger;
use crate::types::{AccountId, LedgerError, OperationRecord};

/// Result of applying a single operation
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// The operation that was applied
    pub record: OperationRecord,

    /// The ledger's answer
    pub result: Result<(), LedgerError>,
}

/// Batch processor with account-based partitioning
///
/// Cheap to clone; every clone drives the same ledger.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    ledger: Ledger,
}

impl BatchProcessor {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Partition a batch by the primary account of each operation
    ///
    /// Each record lands in exactly one partition and partitions keep the
    /// original relative order.
    pub fn partition_by_account(
        &self,
        batch: Vec<OperationRecord>,
    ) -> HashMap<AccountId, Vec<OperationRecord>> {
        let mut account_batches: HashMap<AccountId, Vec<OperationRecord>> = HashMap::new();

        for record in batch {
            account_batches
                .entry(record.account)
                .or_default()
                .push(record);
        }

        account_batches
    }

    /// Apply one partition's operations in order on a fresh context
    ///
    /// Blocks the calling thread; failed operations are captured in the
    /// results and do not stop the partition.
    pub fn process_account_operations(
        &self,
        operations: Vec<OperationRecord>,
    ) -> Vec<ProcessingResult> {
        let mut ctx = self.ledger.new_context();
        let mut results = Vec::with_capacity(operations.len());

        for record in operations {
            let result = self.ledger.apply(&mut ctx, &record);
            results.push(ProcessingResult { record, result });
        }

        results
    }

    /// Apply a batch, running each account partition on the blocking pool
    ///
    /// Results come back grouped by partition, not in input order. A
    /// partition whose task panicked is logged and contributes no results.
    pub async fn process_batch(&self, batch: Vec<OperationRecord>) -> Vec<ProcessingResult> {
        let account_batches = self.partition_by_account(batch);

        let mut tasks = Vec::with_capacity(account_batches.len());
        for (account, operations) in account_batches {
            let processor = self.clone();
            let task = tokio::task::spawn_blocking(move || {
                processor.process_account_operations(operations)
            });
            tasks.push((account, task));
        }

        let mut results = Vec::new();
        for (account, task) in tasks {
            match task.await {
                Ok(account_results) => results.extend(account_results),
                Err(e) => error!(account, error = %e, "Partition task failed"),
            }
        }

        results
    }
}
