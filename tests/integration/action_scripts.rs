//! Token scripts as an operator would write them.

use fidelity_automation::actions::{Action, ActionParseError};
use fidelity_automation::session::{limit_price, StatementPeriod};
use fidelity_automation::types::{AccountType, TradeSide};

#[test]
fn test_morning_script() {
    let script = "5 2 Z11111111 Z22222222 25 bulk_trade sell f 3 4 7 123R";
    let tokens: Vec<&str> = script.split_whitespace().collect();
    let actions = Action::parse_tokens(&tokens).unwrap();
    assert_eq!(
        actions,
        vec![
            Action::ListAccounts,
            Action::Transfer {
                source: "Z11111111".into(),
                destination: "Z22222222".into(),
                amount: 25.0,
            },
            Action::BulkTrade {
                side: TradeSide::Sell,
                ticker: "F".into(),
                quantity: 3.0,
            },
            Action::ListPositions,
            Action::Exit,
        ]
    );
}

#[test]
fn test_owned_tokens_and_statement() {
    let tokens: Vec<String> = ["statement", "12/2023", "123B"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let actions = Action::parse_tokens(&tokens).unwrap();
    let period = StatementPeriod::new(12, 2023).unwrap();
    assert_eq!(period.to_string(), "12/2023");
    assert_eq!(
        actions,
        vec![
            Action::DownloadStatement(period),
            Action::BigThree {
                account_type: AccountType::Brokerage,
                transfer_amount: None,
            },
        ]
    );
}

#[test]
fn test_truncated_script_reports_the_token() {
    let err = Action::parse_tokens(&["4", "bulk_trade", "buy", "AAPL"]).unwrap_err();
    assert_eq!(
        err,
        ActionParseError::MissingArguments {
            token: "bulk_trade".into(),
            expected: 3,
            found: 2,
        }
    );
    assert_eq!(err.to_string(), "'bulk_trade' needs 3 argument(s), found 2");
}

#[test]
fn test_penny_stock_limit_prices() {
    // Sub-dollar buys are placed one tick above the last price.
    let buy = limit_price(0.5, TradeSide::Buy, false);
    assert!((buy - 0.51).abs() < 1e-9);
    let sell = limit_price(0.5, TradeSide::Sell, false);
    assert!((sell - 0.49).abs() < 1e-9);
}
