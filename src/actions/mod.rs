//! Operator actions.
//!
//! The interactive shell produces a list of [`Action`]s; [`execute`] runs
//! them in order against one logged-in session. Older scripts described the
//! same list as flat string tokens, which [`Action::parse_tokens`] still
//! understands.

mod executor;
mod workflows;

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::session::{InvalidPeriod, StatementPeriod};
use crate::types::{AccountType, TradeSide};

pub use executor::{execute, ExecutionSummary, Operator};
pub use workflows::{next_sequential_nickname, BulkTradeReport};

/// One step for the session to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenAccount(AccountType),
    Transfer {
        source: String,
        destination: String,
        amount: f64,
    },
    EnablePennyStock(String),
    EnableAllPennyStock,
    ListPositions,
    ListAccounts,
    Nickname {
        account: String,
        nickname: String,
    },
    TransferSourceToAll {
        source: String,
        amount: f64,
    },
    TransferAllToSource {
        destination: String,
        amount: f64,
    },
    BulkTrade {
        side: TradeSide,
        ticker: String,
        quantity: f64,
    },
    /// Open an account, optionally fund it, enable penny stocks, nickname it.
    BigThree {
        account_type: AccountType,
        transfer_amount: Option<f64>,
    },
    DownloadStatement(StatementPeriod),
    Pause,
    Exit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::OpenAccount(t) => write!(f, "open {t} account"),
            Action::Transfer {
                source,
                destination,
                amount,
            } => write!(f, "transfer ${amount:.2} {source} -> {destination}"),
            Action::EnablePennyStock(acct) => write!(f, "enable penny stocks for {acct}"),
            Action::EnableAllPennyStock => write!(f, "enable penny stocks for all accounts"),
            Action::ListPositions => write!(f, "list positions"),
            Action::ListAccounts => write!(f, "list accounts"),
            Action::Nickname { account, nickname } => write!(f, "nickname {account} as {nickname:?}"),
            Action::TransferSourceToAll { source, amount } => {
                write!(f, "transfer ${amount:.2} from {source} to every account")
            }
            Action::TransferAllToSource {
                destination,
                amount,
            } => write!(f, "transfer ${amount:.2} from every account to {destination}"),
            Action::BulkTrade {
                side,
                ticker,
                quantity,
            } => write!(f, "{side} {quantity} {ticker} in every account"),
            Action::BigThree { account_type, .. } => write!(f, "big three ({account_type})"),
            Action::DownloadStatement(period) => write!(f, "download {period} statement"),
            Action::Pause => write!(f, "pause"),
            Action::Exit => write!(f, "exit"),
        }
    }
}

// ---------------------------------------------------------------------------
// Token lists
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum ActionParseError {
    #[error("'{token}' needs {expected} argument(s), found {found}")]
    MissingArguments {
        token: String,
        expected: usize,
        found: usize,
    },
    #[error("'{token}': {value:?} is not a positive number")]
    InvalidNumber { token: String, value: String },
    #[error("'{token}': {reason}")]
    InvalidArgument { token: String, reason: String },
    #[error(transparent)]
    Period(#[from] InvalidPeriod),
}

/// Cursor over a token list.
struct Tokens<'a, S> {
    tokens: &'a [S],
    pos: usize,
}

impl<'a, S: AsRef<str>> Tokens<'a, S> {
    fn next(&mut self) -> Option<&'a str> {
        let tokens = self.tokens;
        let token = tokens.get(self.pos)?.as_ref();
        self.pos += 1;
        Some(token)
    }

    /// The `n` arguments following `token`.
    fn args(&mut self, token: &str, n: usize) -> Result<Vec<&'a str>, ActionParseError> {
        let available = self.tokens.len() - self.pos;
        if available < n {
            return Err(ActionParseError::MissingArguments {
                token: token.to_string(),
                expected: n,
                found: available,
            });
        }
        let tokens = self.tokens;
        let args = tokens[self.pos..self.pos + n]
            .iter()
            .map(AsRef::as_ref)
            .collect();
        self.pos += n;
        Ok(args)
    }
}

fn positive_number(token: &str, value: &str) -> Result<f64, ActionParseError> {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => Ok(n),
        _ => Err(ActionParseError::InvalidNumber {
            token: token.to_string(),
            value: value.to_string(),
        }),
    }
}

fn invalid(token: &str, e: anyhow::Error) -> ActionParseError {
    ActionParseError::InvalidArgument {
        token: token.to_string(),
        reason: e.to_string(),
    }
}

impl Action {
    /// Interpret a flat token list such as
    /// `["2", "Z1", "Z2", "50", "bulk_trade", "buy", "AAPL", "1", "7"]`.
    ///
    /// Parsing stops after `7` (exit). Unknown tokens are skipped with a
    /// warning; missing or malformed arguments are an error.
    pub fn parse_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Action>, ActionParseError> {
        let mut cursor = Tokens { tokens, pos: 0 };
        let mut actions = Vec::new();

        while let Some(token) = cursor.next() {
            let action = match token {
                "1" => {
                    let a = cursor.args(token, 1)?;
                    Action::OpenAccount(a[0].parse().map_err(|e| invalid(token, e))?)
                }
                "2" => {
                    let a = cursor.args(token, 3)?;
                    Action::Transfer {
                        source: a[0].to_string(),
                        destination: a[1].to_string(),
                        amount: positive_number(token, a[2])?,
                    }
                }
                "3" => Action::EnablePennyStock(cursor.args(token, 1)?[0].to_string()),
                "enable_all" => Action::EnableAllPennyStock,
                "4" => Action::ListPositions,
                "5" => Action::ListAccounts,
                "6" => {
                    let a = cursor.args(token, 2)?;
                    Action::Nickname {
                        account: a[0].to_string(),
                        nickname: a[1].to_string(),
                    }
                }
                "source_to_all" => {
                    let a = cursor.args(token, 2)?;
                    Action::TransferSourceToAll {
                        source: a[0].to_string(),
                        amount: positive_number(token, a[1])?,
                    }
                }
                "all_to_source" => {
                    let a = cursor.args(token, 2)?;
                    Action::TransferAllToSource {
                        destination: a[0].to_string(),
                        amount: positive_number(token, a[1])?,
                    }
                }
                "bulk_trade" => {
                    let a = cursor.args(token, 3)?;
                    Action::BulkTrade {
                        side: a[0].parse().map_err(|e| invalid(token, e))?,
                        ticker: a[1].to_uppercase(),
                        quantity: positive_number(token, a[2])?,
                    }
                }
                "123R" => Action::BigThree {
                    account_type: AccountType::Roth,
                    transfer_amount: None,
                },
                "123B" => Action::BigThree {
                    account_type: AccountType::Brokerage,
                    transfer_amount: None,
                },
                "statement" => {
                    let a = cursor.args(token, 1)?;
                    Action::DownloadStatement(StatementPeriod::parse(a[0])?)
                }
                "pause" => Action::Pause,
                "7" => {
                    actions.push(Action::Exit);
                    break;
                }
                other => {
                    warn!(token = %other, "Skipping unknown action token");
                    continue;
                }
            };
            actions.push(action);
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_token_kind() {
        let tokens = [
            "1", "roth", "2", "Z1", "Z2", "50", "3", "Z3", "enable_all", "4", "5", "6", "Z4",
            "Fun 2", "source_to_all", "Z1", "10", "all_to_source", "Z1", "5.5", "bulk_trade",
            "Buy", "aapl", "2", "123R", "123B", "statement", "03/2024", "pause", "7",
        ];
        let actions = Action::parse_tokens(&tokens).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::OpenAccount(AccountType::Roth),
                Action::Transfer {
                    source: "Z1".into(),
                    destination: "Z2".into(),
                    amount: 50.0
                },
                Action::EnablePennyStock("Z3".into()),
                Action::EnableAllPennyStock,
                Action::ListPositions,
                Action::ListAccounts,
                Action::Nickname {
                    account: "Z4".into(),
                    nickname: "Fun 2".into()
                },
                Action::TransferSourceToAll {
                    source: "Z1".into(),
                    amount: 10.0
                },
                Action::TransferAllToSource {
                    destination: "Z1".into(),
                    amount: 5.5
                },
                Action::BulkTrade {
                    side: TradeSide::Buy,
                    ticker: "AAPL".into(),
                    quantity: 2.0
                },
                Action::BigThree {
                    account_type: AccountType::Roth,
                    transfer_amount: None
                },
                Action::BigThree {
                    account_type: AccountType::Brokerage,
                    transfer_amount: None
                },
                Action::DownloadStatement(StatementPeriod::new(3, 2024).unwrap()),
                Action::Pause,
                Action::Exit,
            ]
        );
    }

    #[test]
    fn test_parse_stops_at_exit() {
        let actions = Action::parse_tokens(&["4", "7", "5", "pause"]).unwrap();
        assert_eq!(actions, vec![Action::ListPositions, Action::Exit]);
    }

    #[test]
    fn test_missing_arguments() {
        let err = Action::parse_tokens(&["2", "Z1", "Z2"]).unwrap_err();
        assert_eq!(
            err,
            ActionParseError::MissingArguments {
                token: "2".into(),
                expected: 3,
                found: 2
            }
        );
        assert!(Action::parse_tokens(&["6", "Z1"]).is_err());
        assert!(Action::parse_tokens(&["1"]).is_err());
    }

    #[test]
    fn test_bad_numbers() {
        for amount in ["abc", "-5", "0", "NaN", "inf"] {
            let err = Action::parse_tokens(&["source_to_all", "Z1", amount]).unwrap_err();
            assert!(
                matches!(err, ActionParseError::InvalidNumber { .. }),
                "{amount} should be rejected"
            );
        }
    }

    #[test]
    fn test_bad_enum_arguments() {
        assert!(matches!(
            Action::parse_tokens(&["1", "joint"]).unwrap_err(),
            ActionParseError::InvalidArgument { .. }
        ));
        assert!(matches!(
            Action::parse_tokens(&["bulk_trade", "hold", "AAPL", "1"]).unwrap_err(),
            ActionParseError::InvalidArgument { .. }
        ));
        assert!(matches!(
            Action::parse_tokens(&["statement", "13/2024"]).unwrap_err(),
            ActionParseError::Period(_)
        ));
    }

    #[test]
    fn test_unknown_tokens_skipped() {
        let actions = Action::parse_tokens(&["bogus", "5", "???"]).unwrap();
        assert_eq!(actions, vec![Action::ListAccounts]);
    }

    #[test]
    fn test_empty_list() {
        let empty: [&str; 0] = [];
        assert!(Action::parse_tokens(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_display() {
        let a = Action::BulkTrade {
            side: TradeSide::Sell,
            ticker: "F".into(),
            quantity: 3.0,
        };
        assert_eq!(a.to_string(), "SELL 3 F in every account");
    }
}
