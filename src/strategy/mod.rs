//! Processing strategy module for batch ledger runs
//!
//! This module defines the Strategy pattern for driving the ledger from an
//! operations file. Different processing implementations (synchronous,
//! asynchronous batch) can be selected at runtime; both apply every
//! operation through the same [`Ledger`].

use crate::cli::StrategyType;
use crate::core::Ledger;
use crate::io::csv_format::write_accounts_csv;
use crate::types::{LedgerError, OperationRecord};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub mod r#async;
pub mod batch;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use batch::{BatchProcessor, ProcessingResult};
pub use sync::SyncProcessingStrategy;

/// Outcome counts of a processing run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Operations the ledger accepted
    pub applied: usize,
    /// Operations the ledger rejected
    pub failed: usize,
}

impl ProcessingSummary {
    /// Count one operation outcome, logging rejections
    pub fn record(&mut self, record: &OperationRecord, result: &Result<(), LedgerError>) {
        match result {
            Ok(()) => self.applied += 1,
            Err(e) => {
                self.failed += 1;
                warn!(
                    operation = %record.op_type,
                    account = record.account,
                    destination = ?record.destination,
                    amount = %record.amount,
                    reason_code = e.reason_code().unwrap_or("-"),
                    error = %e,
                    "Operation rejected"
                );
            }
        }
    }

    pub fn merge(&mut self, other: ProcessingSummary) {
        self.applied += other.applied;
        self.failed += other.failed;
    }
}

/// Processing strategy trait for ledger runs
pub trait ProcessingStrategy: Send + Sync {
    /// Apply every operation in `input_path` to `ledger`
    ///
    /// # Returns
    ///
    /// * `Ok(ProcessingSummary)` once the whole file has been read
    /// * `Err(String)` if a fatal error occurred (file not found, runtime failure)
    ///
    /// Malformed rows and rejected operations are logged and do not stop
    /// processing.
    fn process(&self, ledger: &Ledger, input_path: &Path) -> Result<ProcessingSummary, String>;
}

/// Create a processing strategy based on the specified strategy type
///
/// # Arguments
///
/// * `strategy_type` - The type of processing strategy to create (Sync or Async)
/// * `config` - Optional configuration for async batch processing (ignored for sync)
pub fn create_strategy(
    strategy_type: StrategyType,
    config: Option<BatchConfig>,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy),
        StrategyType::Async => {
            let config = config.unwrap_or_default();
            Box::new(AsyncProcessingStrategy::new(config))
        }
    }
}

/// Run `strategy` over `input_path` and write the final account table to `output`
pub fn run(
    strategy: &dyn ProcessingStrategy,
    ledger: &Ledger,
    input_path: &Path,
    output: &mut dyn Write,
) -> Result<ProcessingSummary, String> {
    let summary = strategy.process(ledger, input_path)?;
    info!(
        applied = summary.applied,
        failed = summary.failed,
        "Processing finished"
    );

    let mut ctx = ledger.new_context();
    let accounts = ledger
        .get_all_accounts(&mut ctx)
        .map_err(|e| format!("Failed to read final accounts: {}", e))?;
    write_accounts_csv(&accounts, output)?;

    Ok(summary)
}
