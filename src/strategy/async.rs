//! Asynchronous batch processing strategy
//!
//! Reads the operations file in batches and applies each batch through a
//! [`BatchProcessor`], which runs account partitions in parallel.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent_batches)
//!     ├── AsyncReader (batch CSV reading)
//!     └── BatchProcessor (account partitioning + blocking pool)
//!         └── Ledger (shared, lock-protected)
//! ```
//!
//! Batches are processed one after another, so an account's operations keep
//! file order even when they span several batches. Ledger calls block on
//! key and row locks, so partitions run on the blocking pool, capped at
//! `max_concurrent_batches` threads.

use crate::core::Ledger;
use crate::io::async_reader::AsyncReader;
use crate::strategy::batch::BatchProcessor;
use crate::strategy::{ProcessingStrategy, ProcessingSummary};
use std::path::Path;
use tracing::{debug, warn};

/// Configuration for batch processing
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Number of operations per batch
    pub batch_size: usize,
    /// Maximum number of partitions applied concurrently
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_batches: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig; zero values fall back to the defaults
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                batch_size,
                default = default.batch_size,
                "Invalid batch_size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_batches = if max_concurrent_batches == 0 {
            warn!(
                max_concurrent_batches,
                default = default.max_concurrent_batches,
                "Invalid max_concurrent_batches, using default"
            );
            default.max_concurrent_batches
        } else {
            max_concurrent_batches
        };

        Self {
            batch_size,
            max_concurrent_batches,
        }
    }
}

/// Asynchronous batch processing strategy
#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    config: BatchConfig,
}

impl AsyncProcessingStrategy {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    /// Process operations from the input file in batches
    ///
    /// 1. Builds a multi-threaded runtime sized from the config
    /// 2. Reads a batch with `AsyncReader`
    /// 3. Applies it through `BatchProcessor` and waits for every partition
    /// 4. Repeats until the reader is exhausted
    fn process(&self, ledger: &Ledger, input_path: &Path) -> Result<ProcessingSummary, String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_batches)
            .max_blocking_threads(self.config.max_concurrent_batches)
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(async {
            let processor = BatchProcessor::new(ledger.clone());

            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| format!("Failed to open file '{}': {}", input_path.display(), e))?;

            // csv-async reads through the futures io traits
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncReader::new(compat_file);
            let mut summary = ProcessingSummary::default();

            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                debug!(size = batch.len(), "Applying batch");
                let mut batch_summary = ProcessingSummary::default();
                for outcome in processor.process_batch(batch).await {
                    batch_summary.record(&outcome.record, &outcome.result);
                }
                debug!(
                    applied = batch_summary.applied,
                    failed = batch_summary.failed,
                    "Batch applied"
                );
                summary.merge(batch_summary);
            }

            Ok(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::Account;
    use rust_decimal::Decimal;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn setup() -> (MemoryStore, Ledger) {
        let store = MemoryStore::with_accounts(vec![
            Account::new(1, 1001, "Alice", Decimal::new(100, 0)),
            Account::new(2, 1002, "Bob", Decimal::new(50, 0)),
        ]);
        let ledger = Ledger::with_pool(Arc::new(store.clone()));
        (store, ledger)
    }

    #[test]
    fn test_batch_config_falls_back_on_zero() {
        let config = BatchConfig::new(0, 0);
        let default = BatchConfig::default();

        assert_eq!(config.batch_size, default.batch_size);
        assert_eq!(config.max_concurrent_batches, default.max_concurrent_batches);
    }

    #[test]
    fn test_async_strategy_handles_missing_file() {
        let (_store, ledger) = setup();
        let strategy = AsyncProcessingStrategy::new(BatchConfig::default());

        let result = strategy.process(&ledger, Path::new("nonexistent.csv"));
        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_async_strategy_maintains_ordering_across_batches() {
        // Account 1 would be overdrawn if its later withdrawal ran first
        let csv_content = "type,account,destination,amount\n\
                          withdraw,1,,70.0\n\
                          deposit,2,,50.0\n\
                          deposit,1,,30.0\n\
                          deposit,2,,25.0\n\
                          withdraw,1,,60.0\n";
        let file = create_temp_csv(csv_content);
        let (store, ledger) = setup();

        // Small batches force the account's operations across several
        let strategy = AsyncProcessingStrategy::new(BatchConfig::new(2, 2));
        let summary = strategy.process(&ledger, file.path()).unwrap();

        assert_eq!(summary.applied, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.committed_balance(1), Some(Decimal::ZERO));
        assert_eq!(store.committed_balance(2), Some(Decimal::new(125, 0)));
    }

    #[test]
    fn test_async_strategy_counts_rejections() {
        let csv_content = "type,account,destination,amount\n\
                          transfer,1,2,200\n\
                          withdraw,2,,-5\n\
                          deposit,7,,1\n\
                          transfer,2,1,50\n";
        let file = create_temp_csv(csv_content);
        let (store, ledger) = setup();

        let strategy = AsyncProcessingStrategy::new(BatchConfig::default());
        let summary = strategy.process(&ledger, file.path()).unwrap();

        assert_eq!(
            summary,
            ProcessingSummary {
                applied: 1,
                failed: 3
            }
        );
        assert_eq!(store.committed_balance(1), Some(Decimal::new(150, 0)));
        assert_eq!(store.committed_balance(2), Some(Decimal::ZERO));
    }
}
