//! Synchronous processing strategy
//!
//! Applies operations one at a time in file order on a single transaction
//! context.
//!
//! # Design
//!
//! The SyncProcessingStrategy focuses on orchestration, delegating:
//! - CSV parsing to `SyncReader` (iterator interface)
//! - Business logic to the `Ledger`
//!
//! Records are streamed, so memory use does not grow with the input size.

use crate::core::Ledger;
use crate::io::sync_reader::SyncReader;
use crate::strategy::{ProcessingStrategy, ProcessingSummary};
use std::path::Path;
use tracing::warn;

/// Synchronous processing strategy
///
/// # Examples
///
/// ```no_run
/// use rust_funds_transfer::core::Ledger;
/// use rust_funds_transfer::storage::MemoryStore;
/// use rust_funds_transfer::strategy::{ProcessingStrategy, SyncProcessingStrategy};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let ledger = Ledger::with_pool(Arc::new(MemoryStore::with_accounts(vec![])));
/// let summary = SyncProcessingStrategy
///     .process(&ledger, Path::new("operations.csv"))
///     .expect("Processing failed");
/// println!("{} applied, {} rejected", summary.applied, summary.failed);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SyncProcessingStrategy;

impl ProcessingStrategy for SyncProcessingStrategy {
    fn process(&self, ledger: &Ledger, input_path: &Path) -> Result<ProcessingSummary, String> {
        let reader = SyncReader::new(input_path)?;
        let mut ctx = ledger.new_context();
        let mut summary = ProcessingSummary::default();

        for result in reader {
            match result {
                Ok(record) => {
                    let outcome = ledger.apply(&mut ctx, &record);
                    summary.record(&record, &outcome);
                }
                Err(e) => warn!(error = %e, "Skipping invalid operation record"),
            }
        }

        Ok(summary)
    }
}
