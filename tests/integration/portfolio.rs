//! Positions export and dropdown scraping feeding one store.

use std::fs;

use fidelity_automation::actions::next_sequential_nickname;
use fidelity_automation::positions::{
    apply_rows, import_positions_file, parse_positions_csv, PositionsError,
};
use fidelity_automation::store::{
    parse_balance_cell, parse_option_text, AccountStore, DropdownEntry, MergeOutcome,
};
use fidelity_automation::types::AccountType;

const EXPORT: &str = "\u{feff}Account Number,Account Name,Symbol,Description,Quantity,Last Price,Last Price Change,Current Value,Type
Z11111111,Fun 1,SPAXX**,HELD IN MONEY MARKET,,,,$25.10,Cash
Z11111111,Fun 1,AAPL,APPLE INC,2,$190.00,+$1.00,$380.00,Cash
Z22222222,Fun 2,AAPL,APPLE INC,1,$190.00,+$1.00,$190.00,Cash
Z22222222,Fun 2,Pending Activity,,,,,$-5.00,
Y99999999,Managed,FXAIX,FIDELITY 500 INDEX,3,$180.00,,$540.00,Cash
123456789,ROTH IRA,F,FORD MOTOR CO,10,$12.00,-$0.10,$120.00,Cash

\"The data and information in this spreadsheet is provided to you solely for your use and is not for distribution.\"
\"Brokerage services are provided by Fidelity Brokerage Services LLC (FBS)\"
";

fn dropdown(texts: &[(&str, Option<&str>)]) -> Vec<DropdownEntry> {
    texts
        .iter()
        .filter_map(|(text, balance)| {
            let (account, nickname) = parse_option_text(text)?;
            Some(DropdownEntry {
                account,
                nickname,
                withdrawal_balance: balance.and_then(parse_balance_cell),
            })
        })
        .collect()
}

#[test]
fn test_export_import_builds_accounts_and_holdings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Portfolio_Positions.csv");
    fs::write(&path, EXPORT).unwrap();

    let mut store = AccountStore::new();
    let rows = import_positions_file(&mut store, &path).unwrap();
    assert_eq!(rows, 4);
    assert!(!path.exists(), "the export is deleted after import");

    assert_eq!(store.account_numbers(), vec!["Z11111111", "Z22222222", "123456789"]);
    assert!(!store.contains("Y99999999"));

    let fun1 = store.get("Z11111111").unwrap();
    assert_eq!(fun1.nickname.as_deref(), Some("Fun 1"));
    assert_eq!(fun1.positions.len(), 2);
    assert!((fun1.balance - 405.10).abs() < 1e-9);
    // Cash sweep: no quantity, price taken from the value.
    assert_eq!(fun1.positions[0].quantity, 1.0);
    assert_eq!(fun1.positions[0].last_price, 25.10);

    let holdings = store.summary_holdings();
    let aapl = &holdings["AAPL"];
    assert_eq!(aapl.quantity, 3.0);
    assert_eq!(aapl.value, 570.0);
    assert!(!holdings.contains_key("Pending Activity"));
    assert!((store.total_balance() - 715.10).abs() < 1e-9);
}

#[test]
fn test_export_with_renamed_column_is_rejected() {
    let broken = EXPORT.replace("Current Value", "Value");
    match parse_positions_csv(&broken) {
        Err(PositionsError::MissingColumns { missing }) => assert_eq!(missing, vec!["Current Value"]),
        other => panic!("expected missing columns, got {other:?}"),
    }
}

#[test]
fn test_dropdown_then_export_keeps_discovery_order() {
    let mut store = AccountStore::new();
    let entries = dropdown(&[
        ("Select an account", None),
        ("ROTH IRA (123456789)", Some("$0.00")),
        ("Individual (Z11111111)", Some("$1,250.75")),
        ("External Bank ****1234", Some("$9.99")),
    ]);
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert_eq!(store.merge_dropdown(entry, true), MergeOutcome::Created);
    }
    assert_eq!(store.get("Z11111111").unwrap().withdrawal_balance, 1250.75);
    assert_eq!(store.get("Z11111111").unwrap().balance, 0.0);

    let rows = parse_positions_csv(EXPORT).unwrap();
    apply_rows(&mut store, rows).unwrap();

    assert_eq!(store.account_numbers(), vec!["123456789", "Z11111111", "Z22222222"]);
    // The dropdown nickname was first and is kept; the export only adds positions.
    assert_eq!(store.get("Z11111111").unwrap().nickname.as_deref(), Some("Individual"));
    assert!((store.get("Z11111111").unwrap().balance - 405.10).abs() < 1e-9);
    assert_eq!(store.get("Z11111111").unwrap().withdrawal_balance, 1250.75);
}

#[test]
fn test_rescrape_overwrites_nickname_not_balance() {
    let mut store = AccountStore::new();
    let rows = parse_positions_csv(EXPORT).unwrap();
    apply_rows(&mut store, rows).unwrap();

    for entry in dropdown(&[("Fun 7 (Z22222222)", Some("$12.00"))]) {
        assert_eq!(store.merge_dropdown(entry, true), MergeOutcome::Updated);
    }
    let record = store.get("Z22222222").unwrap();
    assert_eq!(record.nickname.as_deref(), Some("Fun 7"));
    assert_eq!(record.withdrawal_balance, 12.0);
    assert_eq!(record.balance, 190.0);
}

#[test]
fn test_next_nickname_follows_scraped_series() {
    let mut store = AccountStore::new();
    for entry in dropdown(&[
        ("Fun 1 (Z11111111)", None),
        ("Fun 2 (Z22222222)", None),
        ("ROTH IRA (123456789)", None),
        ("Roth 4 (987654321)", None),
    ]) {
        store.merge_dropdown(entry, false);
    }
    assert_eq!(
        next_sequential_nickname(&store, AccountType::Brokerage).as_deref(),
        Some("Fun 3")
    );
    assert_eq!(
        next_sequential_nickname(&store, AccountType::Roth).as_deref(),
        Some("Roth 5")
    );
}

#[test]
fn test_second_import_appends_duplicate_tickers() {
    let mut store = AccountStore::new();
    apply_rows(&mut store, parse_positions_csv(EXPORT).unwrap()).unwrap();
    apply_rows(&mut store, parse_positions_csv(EXPORT).unwrap()).unwrap();

    // Positions are not deduplicated: a second pass doubles everything.
    let roth = store.get("123456789").unwrap();
    assert_eq!(roth.positions.len(), 2);
    assert_eq!(roth.positions[0], roth.positions[1]);
    assert_eq!(roth.balance, 240.0);
    assert_eq!(store.summary_holdings()["AAPL"].quantity, 6.0);
    assert_eq!(store.stocks_in_account("123456789").unwrap()["F"], 10.0);
}
