use crate::storage::StoreConfig;
use crate::strategy::BatchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Apply withdrawals, deposits and transfers to an account snapshot
#[derive(Parser, Debug)]
#[command(name = "funds-transfer")]
#[command(about = "Apply withdrawals, deposits and transfers to an account snapshot", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing operation records
    #[arg(value_name = "INPUT", help = "Path to the operations CSV file")]
    pub input_file: PathBuf,

    /// Initial account snapshot
    #[arg(
        long = "accounts",
        value_name = "FILE",
        help = "Path to the accounts CSV file (id,account_number,name,balance)"
    )]
    pub accounts_file: PathBuf,

    /// Processing strategy to use
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Processing strategy: 'sync' for file order on one thread or 'async' for batches"
    )]
    pub strategy: StrategyType,

    /// Number of operations per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of operations per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of concurrent partitions (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of partitions applied concurrently (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// Row lock wait bound of the in-memory store
    #[arg(
        long = "row-lock-timeout-ms",
        value_name = "MS",
        help = "How long a connection waits for another's row lock (default: 10000)"
    )]
    pub row_lock_timeout_ms: Option<u64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        default_value = "warn",
        help = "Log level or filter directive; RUST_LOG takes precedence"
    )]
    pub log_level: String,
}

/// Available processing strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments
    ///
    /// Missing values take the defaults; zero values are rejected by
    /// `BatchConfig::new` with a warning.
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent_batches.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent_batches
                    .unwrap_or(default.max_concurrent_batches),
            )
        } else {
            BatchConfig::default()
        }
    }

    pub fn to_store_config(&self) -> StoreConfig {
        match self.row_lock_timeout_ms {
            Some(ms) => StoreConfig::new(Duration::from_millis(ms)),
            None => StoreConfig::default(),
        }
    }
}
