//! Multi-step workflows built from the session scripts.

use std::fmt;
use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::session::{format_quantity, FidelitySession, OrderRequest};
use crate::store::AccountStore;
use crate::types::{AccountType, TradeSide};

// ---------------------------------------------------------------------------
// Bulk trade
// ---------------------------------------------------------------------------

/// Per-account outcome of a bulk trade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkTradeReport {
    pub succeeded: Vec<String>,
    /// Account number and the reason its order failed.
    pub failed: Vec<(String, String)>,
}

impl BulkTradeReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for BulkTradeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transaction Summary:")?;
        writeln!(f, "Successful: {}", self.succeeded.len())?;
        write!(f, "Failed: {}", self.failed.len())
    }
}

/// Place the same order in every account of the login.
pub async fn bulk_trade(
    session: &mut FidelitySession,
    side: TradeSide,
    ticker: &str,
    quantity: f64,
) -> Result<BulkTradeReport> {
    let accounts: Vec<(String, String)> = session
        .get_list_of_accounts(false)
        .await?
        .iter()
        .map(|(acct, record)| (acct.to_string(), record.nickname.clone().unwrap_or_default()))
        .collect();
    if accounts.is_empty() {
        bail!("No accounts found");
    }

    println!("\nExecuting {side} orders:");
    println!("Stock: {ticker}");
    println!("Quantity per account: {}", format_quantity(quantity));
    println!("\nProcessing accounts:");

    let mut report = BulkTradeReport::default();
    for (account, nickname) in accounts {
        println!("\nAccount {account} ({nickname}):");
        let order = OrderRequest {
            ticker: ticker.to_string(),
            quantity,
            side,
            account: account.clone(),
            dry_run: false,
        };
        match session.transaction(&order).await {
            Ok(()) => {
                println!("✓ Success");
                report.succeeded.push(account);
            }
            Err(e) => {
                println!("✗ Failed: {e}");
                report.failed.push((account, e.to_string()));
            }
        }
    }
    println!("\n{report}");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Big three
// ---------------------------------------------------------------------------

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("hardcoded regex"))
}

fn base_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\d]+").expect("hardcoded regex"))
}

/// Next nickname in a numbered series such as `Fun 1`, `Fun 2`, ...
///
/// Looks at accounts of `account_type` whose nickname contains a number and
/// returns the base name of the highest-numbered one followed by that
/// number plus one. `None` when no such account exists.
pub fn next_sequential_nickname(store: &AccountStore, account_type: AccountType) -> Option<String> {
    let mut counter: u64 = 0;
    let mut base: Option<String> = None;
    for (account, record) in store.iter() {
        if !account_type.matches_account(account) {
            continue;
        }
        let Some(nickname) = record.nickname.as_deref() else {
            continue;
        };
        let Some(number) = number_re()
            .find(nickname)
            .and_then(|m| m.as_str().parse::<u64>().ok())
        else {
            continue;
        };
        if counter <= number {
            counter = number.saturating_add(1);
            if let Some(name) = base_name_re().find(nickname) {
                base = Some(name.as_str().to_string());
            }
        }
    }
    base.map(|name| format!("{name}{counter}"))
}

/// Open an account, fund it from the source account, enable penny stocks
/// and give it the next nickname in its series.
///
/// Only the account opening is fatal; the later steps log and move on.
pub async fn big_three(
    session: &mut FidelitySession,
    account_type: AccountType,
    transfer_amount: Option<f64>,
) -> Result<String> {
    if account_type == AccountType::Roth {
        session.get_list_of_accounts(false).await?;
    }

    println!("\nOpening new {account_type} account...");
    let account = session.open_account(account_type).await?;
    println!("New account: {account}");

    if let Some(amount) = transfer_amount.filter(|a| *a > 0.0) {
        match session.source_account.clone() {
            Some(source) => {
                println!("\nTransferring ${amount:.2} to new account...");
                if let Err(e) = session.transfer_acc_to_acc(&source, &account, amount).await {
                    warn!(%account, error = %e, "Funding the new account failed");
                    println!("✗ Transfer failed: {e}");
                }
            }
            None => warn!("No source account configured, skipping the transfer"),
        }
    }

    println!("\nEnabling penny stock trading...");
    if let Err(e) = session.enable_pennystock_trading(&account).await {
        warn!(%account, error = %e, "Penny stock enablement failed");
        println!("✗ Penny stock trading not enabled: {e}");
    }

    println!("\nSetting account nickname...");
    match next_sequential_nickname(session.store(), account_type) {
        Some(nickname) => match session.nickname_account(&account, &nickname).await {
            Ok(()) => println!("Account nicknamed as: {nickname}"),
            Err(e) => {
                warn!(%account, error = %e, "Nickname failed");
                println!("✗ Nickname failed: {e}");
            }
        },
        None => info!(%account_type, "No numbered nickname series found, keeping the default name"),
    }

    println!("\nBig three process completed!");
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DropdownEntry;

    fn store_with(entries: &[(&str, &str)]) -> AccountStore {
        let mut store = AccountStore::new();
        for (account, nickname) in entries {
            store.merge_dropdown(
                DropdownEntry {
                    account: account.to_string(),
                    nickname: nickname.to_string(),
                    withdrawal_balance: None,
                },
                true,
            );
        }
        store
    }

    #[test]
    fn test_next_nickname_takes_highest_of_type() {
        let store = store_with(&[
            ("Z11111111", "Fun 1"),
            ("Z22222222", "Fun 3"),
            ("Z33333333", "Fun 2"),
            ("444444444", "Roth 9"),
        ]);
        assert_eq!(
            next_sequential_nickname(&store, AccountType::Brokerage).as_deref(),
            Some("Fun 4")
        );
        assert_eq!(
            next_sequential_nickname(&store, AccountType::Roth).as_deref(),
            Some("Roth 10")
        );
    }

    #[test]
    fn test_next_nickname_none_without_numbers() {
        let store = store_with(&[("Z11111111", "Individual"), ("222222222", "ROTH IRA")]);
        assert_eq!(next_sequential_nickname(&store, AccountType::Brokerage), None);
        assert_eq!(next_sequential_nickname(&store, AccountType::Roth), None);
    }

    #[test]
    fn test_next_nickname_empty_store() {
        assert_eq!(
            next_sequential_nickname(&AccountStore::new(), AccountType::Roth),
            None
        );
    }

    #[test]
    fn test_bulk_report_display() {
        let report = BulkTradeReport {
            succeeded: vec!["Z1".into(), "Z2".into()],
            failed: vec![("Z3".into(), "rejected".into())],
        };
        assert!(!report.all_succeeded());
        assert_eq!(
            report.to_string(),
            "Transaction Summary:\nSuccessful: 2\nFailed: 1"
        );
    }
}
