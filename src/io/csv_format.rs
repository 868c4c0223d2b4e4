//! CSV format handling for operation records and account snapshots
//!
//! This module centralizes all CSV format concerns, providing:
//! - OperationCsvRecord structure for deserializing the operations file
//! - Conversion from CSV records to domain types
//! - Account snapshot reading and writing
//!
//! # Formats
//!
//! ```text
//! operations: type,account,destination,amount
//!             withdraw,1,,10.5
//!             transfer,1,2,3.0
//!
//! accounts:   id,account_number,name,balance
//!             1,1001,Alice,1000.0000
//! ```

use crate::types::{Account, AccountId, AccountNumber, OperationRecord, OperationType};
use csv::{ReaderBuilder, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

/// CSV record structure for the operations file
///
/// Destination is only meaningful for transfers, so it is optional.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OperationCsvRecord {
    #[serde(rename = "type")]
    pub op_type: String,
    pub account: AccountId,
    pub destination: Option<String>,
    pub amount: Option<String>,
}

/// CSV record structure for the accounts snapshot
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountCsvRecord {
    pub id: AccountId,
    pub account_number: AccountNumber,
    pub name: String,
    pub balance: String,
}

/// Convert an OperationCsvRecord to an OperationRecord
///
/// This function:
/// - Parses the operation type (case-insensitive)
/// - Parses the amount, which every operation requires
/// - Requires a destination for transfers and ignores it otherwise
///
/// Amount sign is not checked here; the ledger rejects non-positive
/// amounts with its own error.
///
/// # Returns
///
/// * `Ok(OperationRecord)` - Successfully converted record
/// * `Err(String)` - Error message describing the conversion failure
pub fn convert_csv_record(csv_record: OperationCsvRecord) -> Result<OperationRecord, String> {
    let op_type = match csv_record.op_type.to_lowercase().as_str() {
        "withdraw" => OperationType::Withdraw,
        "deposit" => OperationType::Deposit,
        "transfer" => OperationType::Transfer,
        _ => {
            return Err(format!(
                "Invalid operation type: '{}' for account {}",
                csv_record.op_type, csv_record.account
            ))
        }
    };

    let amount = match csv_record.amount {
        Some(amount_str) if !amount_str.trim().is_empty() => Decimal::from_str(amount_str.trim())
            .map_err(|_| {
                format!(
                    "Invalid amount '{}' for account {}",
                    amount_str, csv_record.account
                )
            })?,
        _ => {
            return Err(format!(
                "{} on account {} requires an amount",
                op_type, csv_record.account
            ))
        }
    };

    let destination = match (op_type, csv_record.destination) {
        (OperationType::Transfer, Some(dest)) if !dest.trim().is_empty() => {
            Some(AccountId::from_str(dest.trim()).map_err(|_| {
                format!(
                    "Invalid destination '{}' for transfer from account {}",
                    dest, csv_record.account
                )
            })?)
        }
        (OperationType::Transfer, _) => {
            return Err(format!(
                "transfer from account {} requires a destination",
                csv_record.account
            ))
        }
        _ => None,
    };

    Ok(OperationRecord {
        op_type,
        account: csv_record.account,
        destination,
        amount,
    })
}

/// Read an accounts snapshot
///
/// Unlike operations, a malformed account row is fatal: the ledger cannot
/// start from a partial table.
pub fn read_accounts_csv<R: Read>(input: R) -> Result<Vec<Account>, String> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(input);

    let mut accounts = Vec::new();
    for (index, row) in reader.deserialize::<AccountCsvRecord>().enumerate() {
        let line = index + 2;
        let row = row.map_err(|e| format!("Line {}: {}", line, e))?;
        let balance = Decimal::from_str(&row.balance).map_err(|_| {
            format!(
                "Line {}: invalid balance '{}' for account {}",
                line, row.balance, row.id
            )
        })?;
        if balance < Decimal::ZERO {
            return Err(format!(
                "Line {}: negative balance {} for account {}",
                line, balance, row.id
            ));
        }
        accounts.push(Account::new(row.id, row.account_number, row.name, balance));
    }

    Ok(accounts)
}

/// Read an accounts snapshot from a file
pub fn load_accounts(path: &Path) -> Result<Vec<Account>, String> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;
    read_accounts_csv(file)
}

/// Write account states to CSV format
///
/// Writes accounts with columns: id, account_number, name, balance.
/// Accounts are sorted by id for deterministic output and balances are
/// printed with four decimal places.
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_accounts_csv(accounts: &[Account], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["id", "account_number", "name", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted_accounts = accounts.to_vec();
    sorted_accounts.sort_by_key(|account| account.id);

    for account in sorted_accounts {
        writer
            .write_record(&[
                account.id.to_string(),
                account.account_number.to_string(),
                account.name,
                format!("{:.4}", account.balance),
            ])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn csv_record(
        op_type: &str,
        destination: Option<&str>,
        amount: Option<&str>,
    ) -> OperationCsvRecord {
        OperationCsvRecord {
            op_type: op_type.to_string(),
            account: 1,
            destination: destination.map(|s| s.to_string()),
            amount: amount.map(|s| s.to_string()),
        }
    }

    #[rstest]
    #[case("withdraw", OperationType::Withdraw, None)]
    #[case("deposit", OperationType::Deposit, None)]
    #[case("DEPOSIT", OperationType::Deposit, None)] // case insensitive
    #[case("transfer", OperationType::Transfer, Some("2"))]
    fn test_convert_csv_record_valid(
        #[case] op_type: &str,
        #[case] expected_type: OperationType,
        #[case] destination: Option<&str>,
    ) {
        let record = convert_csv_record(csv_record(op_type, destination, Some("100.0"))).unwrap();

        assert_eq!(record.op_type, expected_type);
        assert_eq!(record.account, 1);
        assert_eq!(record.destination, destination.map(|_| 2));
        assert_eq!(record.amount, Decimal::new(1000, 1));
    }

    #[test]
    fn test_destination_ignored_for_single_account_operations() {
        let record = convert_csv_record(csv_record("deposit", Some("7"), Some("1"))).unwrap();
        assert_eq!(record.destination, None);
    }

    #[test]
    fn test_negative_amount_left_to_ledger() {
        let record = convert_csv_record(csv_record("transfer", Some("2"), Some("-5"))).unwrap();
        assert_eq!(record.amount, Decimal::new(-5, 0));
    }

    #[rstest]
    #[case::invalid_type("refund", None, Some("100.0"), "Invalid operation type")]
    #[case::missing_amount("deposit", None, None, "requires an amount")]
    #[case::empty_amount("withdraw", None, Some(""), "requires an amount")]
    #[case::whitespace_amount("withdraw", None, Some("  "), "requires an amount")]
    #[case::invalid_amount("deposit", None, Some("abc"), "Invalid amount")]
    #[case::missing_destination("transfer", None, Some("1"), "requires a destination")]
    #[case::blank_destination("transfer", Some(" "), Some("1"), "requires a destination")]
    #[case::invalid_destination("transfer", Some("x"), Some("1"), "Invalid destination")]
    fn test_convert_csv_record_errors(
        #[case] op_type: &str,
        #[case] destination: Option<&str>,
        #[case] amount: Option<&str>,
        #[case] expected_error: &str,
    ) {
        let result = convert_csv_record(csv_record(op_type, destination, amount));
        assert!(result.unwrap_err().contains(expected_error));
    }

    #[test]
    fn test_read_accounts_csv() {
        let input = "id,account_number,name,balance\n2,1002,Bob,50.5\n1,1001,Alice,1000\n";

        let accounts = read_accounts_csv(input.as_bytes()).unwrap();

        assert_eq!(
            accounts,
            vec![
                Account::new(2, 1002, "Bob", Decimal::new(505, 1)),
                Account::new(1, 1001, "Alice", Decimal::new(1000, 0)),
            ]
        );
    }

    #[rstest]
    #[case::bad_balance("id,account_number,name,balance\n1,1001,Alice,lots\n", "invalid balance")]
    #[case::negative_balance("id,account_number,name,balance\n1,1001,Alice,-1\n", "negative balance")]
    #[case::bad_id("id,account_number,name,balance\nx,1001,Alice,1\n", "Line 2")]
    fn test_read_accounts_csv_errors(#[case] input: &str, #[case] expected_error: &str) {
        let result = read_accounts_csv(input.as_bytes());
        assert!(result.unwrap_err().contains(expected_error));
    }

    #[test]
    fn test_write_accounts_csv_sorted_with_four_decimals() {
        let accounts = vec![
            Account::new(2, 1002, "Bob", Decimal::new(5, 1)),
            Account::new(1, 1001, "Alice", Decimal::new(1000, 0)),
        ];
        let mut output = Vec::new();

        write_accounts_csv(&accounts, &mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "id,account_number,name,balance\n1,1001,Alice,1000.0000\n2,1002,Bob,0.5000\n"
        );
    }

    #[test]
    fn test_write_accounts_csv_empty() {
        let mut output = Vec::new();
        write_accounts_csv(&[], &mut output).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "id,account_number,name,balance\n"
        );
    }
}
