//! Positions CSV export parser.
//!
//! The positions page exports every holding of every account as a CSV.
//! This module validates the header, applies the row rules and feeds the
//! resulting rows into an [`AccountStore`].

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::store::{AccountStore, StoreError};
use crate::types::PositionRecord;

/// Columns the export must carry.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "Account Number",
    "Account Name",
    "Symbol",
    "Description",
    "Quantity",
    "Last Price",
    "Current Value",
];

#[derive(Debug, Error)]
pub enum PositionsError {
    #[error("positions CSV is missing required columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("failed to read positions CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to access positions CSV: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One accepted CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRow {
    pub account: String,
    pub account_name: String,
    pub position: PositionRecord,
}

/// Strip the characters the export decorates numbers with.
fn clean_number(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '-'))
        .collect()
}

/// Parse a cleaned numeric field; anything non-numeric becomes 0.
fn number_or_zero(cleaned: &str) -> f64 {
    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// Parse CSV text into accepted rows.
///
/// Row rules, in order:
/// - rows without an account number are skipped;
/// - the first account number containing `and` starts the disclaimer
///   footer and ends parsing;
/// - accounts starting with `Y` (managed accounts) are skipped;
/// - symbols containing `Pending` are skipped;
/// - rows with an empty current value are skipped;
/// - an empty last price takes the current value;
/// - an empty quantity becomes 1 (cash sweep positions);
/// - any remaining non-numeric field becomes 0.
pub fn parse_positions_csv(text: &str) -> Result<Vec<PositionRow>, PositionsError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim(), i))
        .collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !index.contains_key(*c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PositionsError::MissingColumns { missing });
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |name: &str| {
            index
                .get(name)
                .and_then(|i| record.get(*i))
                .map(str::trim)
                .unwrap_or("")
        };

        let account = field("Account Number");
        if account.is_empty() {
            continue;
        }
        if account.contains("and") {
            debug!(text = account, "Reached positions CSV footer");
            break;
        }
        if account.starts_with('Y') {
            continue;
        }

        let ticker = field("Symbol");
        if ticker.contains("Pending") {
            continue;
        }

        let value = clean_number(field("Current Value"));
        if value.is_empty() {
            continue;
        }
        let mut last_price = clean_number(field("Last Price"));
        if last_price.is_empty() {
            last_price = value.clone();
        }
        let quantity = clean_number(field("Quantity"));
        let quantity = if quantity.is_empty() {
            1.0
        } else {
            number_or_zero(&quantity)
        };

        rows.push(PositionRow {
            account: account.to_string(),
            account_name: field("Account Name").to_string(),
            position: PositionRecord::new(
                ticker,
                quantity,
                number_or_zero(&last_price),
                number_or_zero(&value),
            ),
        });
    }

    Ok(rows)
}

/// Merge parsed rows into the store, one position at a time.
pub fn apply_rows(store: &mut AccountStore, rows: Vec<PositionRow>) -> Result<usize, PositionsError> {
    let count = rows.len();
    for row in rows {
        store.record_position(&row.account, &row.account_name, row.position)?;
    }
    Ok(count)
}

/// Parse a downloaded export into the store and delete the file.
///
/// The file is removed even when parsing fails.
pub fn import_positions_file(store: &mut AccountStore, path: &Path) -> Result<usize, PositionsError> {
    let parsed = std::fs::read_to_string(path)
        .map_err(PositionsError::from)
        .and_then(|text| parse_positions_csv(&text));
    std::fs::remove_file(path)?;

    let count = apply_rows(store, parsed?)?;
    info!(rows = count, accounts = store.len(), "Positions CSV imported");
    Ok(count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Account Number,Account Name,Symbol,Description,Quantity,Last Price,Current Value";

    fn csv_of(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for r in rows {
            out.push('\n');
            out.push_str(r);
        }
        out.push('\n');
        out
    }

    #[test]
    fn test_empty_quantity_defaults_to_one() {
        let rows = parse_positions_csv(&csv_of(&["Z123,Individual,AAPL,,,$150.00,$150.00"])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position, PositionRecord::new("AAPL", 1.0, 150.0, 150.0));
        assert_eq!(rows[0].account, "Z123");
        assert_eq!(rows[0].account_name, "Individual");
    }

    #[test]
    fn test_currency_formatting_stripped() {
        let rows = parse_positions_csv(&csv_of(&[
            "Z123,Individual,MSFT,MICROSOFT CORP,10,$410.25,\"$4,102.50\"",
        ]))
        .unwrap();
        assert_eq!(rows[0].position, PositionRecord::new("MSFT", 10.0, 410.25, 4102.5));
    }

    #[test]
    fn test_empty_last_price_uses_value() {
        let rows =
            parse_positions_csv(&csv_of(&["Z123,Individual,SPAXX**,HELD IN MONEY MARKET,,,$52.10"]))
                .unwrap();
        assert_eq!(rows[0].position.last_price, 52.10);
        assert_eq!(rows[0].position.quantity, 1.0);
    }

    #[test]
    fn test_skip_rules_and_footer() {
        let rows = parse_positions_csv(&csv_of(&[
            ",,,,,,",
            "Y987,Managed,VTI,,1,$200,$200",
            "Z123,Individual,Pending Activity,,,,$-5.00",
            "Z123,Individual,NOVAL,,1,$1,",
            "Z123,Individual,AAPL,,1,$150,$150",
            "\"Date downloaded and other disclaimers\",,,,,,",
            "Z555,Late,TSLA,,1,$1,$1",
        ]))
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position.ticker, "AAPL");
    }

    #[test]
    fn test_non_numeric_becomes_zero() {
        let rows = parse_positions_csv(&csv_of(&["Z1,Individual,ODD,,n/a,abc,$3.00"])).unwrap();
        assert_eq!(rows[0].position.quantity, 0.0);
        assert_eq!(rows[0].position.last_price, 0.0);
        assert_eq!(rows[0].position.value, 3.0);
    }

    #[test]
    fn test_negative_values_lose_sign() {
        let rows = parse_positions_csv(&csv_of(&["Z1,Individual,SHORT,,-2,$5.00,-$10.00"])).unwrap();
        assert_eq!(rows[0].position, PositionRecord::new("SHORT", 2.0, 5.0, 10.0));
    }

    #[test]
    fn test_bom_and_missing_columns() {
        let with_bom = format!("\u{feff}{}", csv_of(&["Z1,Individual,AAPL,,1,$1,$1"]));
        assert_eq!(parse_positions_csv(&with_bom).unwrap().len(), 1);

        let err = parse_positions_csv("Account Number,Symbol\nZ1,AAPL\n").unwrap_err();
        match err {
            PositionsError::MissingColumns { missing } => {
                assert!(missing.contains(&"Description".to_string()));
                assert!(missing.contains(&"Current Value".to_string()));
                assert_eq!(missing.len(), 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_apply_rows_builds_accounts() {
        let rows = parse_positions_csv(&csv_of(&[
            "Z1,Individual,AAPL,,1,$100,$100",
            "Z1,Individual,SPAXX**,,,,$25",
            "222333444,ROTH IRA,VTI,,2,$200,$400",
        ]))
        .unwrap();
        let mut store = AccountStore::new();
        assert_eq!(apply_rows(&mut store, rows).unwrap(), 3);

        let z1 = store.get("Z1").unwrap();
        assert_eq!(z1.balance, 125.0);
        assert_eq!(z1.positions.len(), 2);
        assert_eq!(z1.nickname.as_deref(), Some("Individual"));
        assert_eq!(store.get("222333444").unwrap().balance, 400.0);
    }

    #[test]
    fn test_import_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Portfolio_Positions.csv");
        std::fs::write(&path, csv_of(&["Z1,Individual,AAPL,,1,$100,$100"])).unwrap();

        let mut store = AccountStore::new();
        assert_eq!(import_positions_file(&mut store, &path).unwrap(), 1);
        assert!(!path.exists());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_import_removes_file_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Symbol\nAAPL\n").unwrap();

        let mut store = AccountStore::new();
        assert!(import_positions_file(&mut store, &path).is_err());
        assert!(!path.exists());
        assert!(store.is_empty());
    }
}
