//! Rust Funds Transfer CLI
//!
//! Applies an operations file to an account snapshot and prints the final
//! account table.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --accounts accounts.csv operations.csv > accounts_out.csv
//! cargo run -- --strategy sync --accounts accounts.csv operations.csv > accounts_out.csv
//! cargo run -- --strategy async --batch-size 2000 --max-concurrent 8 --accounts accounts.csv operations.csv
//! RUST_LOG=debug cargo run -- --accounts accounts.csv operations.csv
//! ```
//!
//! Logs go to stderr; the account table goes to stdout.
//!
//! # Processing Strategies
//!
//! - **sync**: Operations applied in file order on one thread
//! - **async**: Batches partitioned by account and applied in parallel (default)
//!
//! # Exit Codes
//!
//! - 0: Success, including runs where individual operations were rejected
//! - 1: Error (missing arguments, unreadable files, invalid account snapshot, etc.)

use rust_funds_transfer::cli;
use rust_funds_transfer::core::{Ledger, LockConfig};
use rust_funds_transfer::io::load_accounts;
use rust_funds_transfer::logging;
use rust_funds_transfer::storage::MemoryStore;
use rust_funds_transfer::strategy;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    let args = cli::parse_args();
    logging::init_logging(&args.log_level);

    if let Err(e) = run(&args) {
        error!(error = %e, "Run failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: &cli::CliArgs) -> Result<(), String> {
    let accounts = load_accounts(&args.accounts_file)?;
    info!(accounts = accounts.len(), "Loaded account snapshot");

    let store = MemoryStore::new(accounts, args.to_store_config());
    let ledger = Ledger::new(Arc::new(store), LockConfig::default());

    let strategy = {
        let config = if matches!(args.strategy, cli::StrategyType::Async) {
            Some(args.to_batch_config())
        } else {
            None
        };
        strategy::create_strategy(args.strategy, config)
    };

    let mut output = std::io::stdout();
    strategy::run(strategy.as_ref(), &ledger, &args.input_file, &mut output)?;
    Ok(())
}
