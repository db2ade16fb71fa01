//! Shared types for the brokerage automation.
//!
//! These types form the data model used across the store, the CSV parser,
//! the browser scripts and the action dispatcher.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Positions and accounts
// ---------------------------------------------------------------------------

/// One holding inside an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub ticker: String,
    pub quantity: f64,
    pub last_price: f64,
    pub value: f64,
}

impl PositionRecord {
    pub fn new(ticker: impl Into<String>, quantity: f64, last_price: f64, value: f64) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            last_price,
            value,
        }
    }

    /// Reject records the store must not accept: an empty ticker or a
    /// non-finite number. Returns the reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.ticker.trim().is_empty() {
            return Err("ticker is empty".to_string());
        }
        for (field, v) in [
            ("quantity", self.quantity),
            ("last_price", self.last_price),
            ("value", self.value),
        ] {
            if !v.is_finite() {
                return Err(format!("{field} is not a finite number ({v})"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PositionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} @ ${:.2} = ${:.2}",
            self.ticker, self.quantity, self.last_price, self.value
        )
    }
}

/// Everything known about one brokerage account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Total account value.
    pub balance: f64,
    /// Cash available for transfer out.
    pub withdrawal_balance: f64,
    pub nickname: Option<String>,
    /// In discovery order. The same ticker may appear more than once.
    pub positions: Vec<PositionRecord>,
}

impl AccountRecord {
    pub fn with_nickname(nickname: impl Into<String>) -> Self {
        Self {
            nickname: Some(nickname.into()),
            ..Self::default()
        }
    }
}

/// A ticker aggregated across every account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingSummary {
    pub quantity: f64,
    /// Price from the first account holding the ticker.
    pub last_price: f64,
    pub value: f64,
}

impl fmt::Display for HoldingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "qty {} | last ${:.2} | value ${:.2}",
            self.quantity, self.last_price, self.value
        )
    }
}

// ---------------------------------------------------------------------------
// Trading
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Label used by the trade ticket's action menu.
    pub fn ticket_label(&self) -> &'static str {
        match self {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Parse "buy"/"sell" in any letter case.
impl std::str::FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            _ => Err(anyhow::anyhow!("Unknown trade side: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Account types
// ---------------------------------------------------------------------------

/// Kinds of account the automation can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Roth,
    Brokerage,
}

impl AccountType {
    /// Pattern matching account numbers of this type.
    pub fn number_pattern(&self) -> &'static str {
        match self {
            AccountType::Roth => r"^\d{9}$",
            AccountType::Brokerage => r"Z\d{8}$",
        }
    }

    /// Whether `account` is a number of this type.
    pub fn matches_account(&self, account: &str) -> bool {
        static ROTH: OnceLock<Regex> = OnceLock::new();
        static BROKERAGE: OnceLock<Regex> = OnceLock::new();
        let cell = match self {
            AccountType::Roth => &ROTH,
            AccountType::Brokerage => &BROKERAGE,
        };
        cell.get_or_init(|| Regex::new(self.number_pattern()).expect("hardcoded regex"))
            .is_match(account)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Roth => write!(f, "roth"),
            AccountType::Brokerage => write!(f, "brokerage"),
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "roth" => Ok(AccountType::Roth),
            "brokerage" => Ok(AccountType::Brokerage),
            _ => Err(anyhow::anyhow!("Unknown account type: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_validate() {
        assert!(PositionRecord::new("AAPL", 1.0, 150.0, 150.0).validate().is_ok());
        assert!(PositionRecord::new("", 1.0, 1.0, 1.0).validate().is_err());
        assert!(PositionRecord::new("  ", 1.0, 1.0, 1.0).validate().is_err());
        let err = PositionRecord::new("X", f64::NAN, 1.0, 1.0).validate().unwrap_err();
        assert!(err.contains("quantity"));
        assert!(PositionRecord::new("X", 1.0, 1.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_position_display() {
        let p = PositionRecord::new("SPAXX", 1.0, 12.5, 12.5);
        assert_eq!(p.to_string(), "SPAXX x1 @ $12.50 = $12.50");
    }

    #[test]
    fn test_account_record_default() {
        let r = AccountRecord::default();
        assert_eq!(r.balance, 0.0);
        assert_eq!(r.withdrawal_balance, 0.0);
        assert!(r.nickname.is_none());
        assert!(r.positions.is_empty());
        assert_eq!(AccountRecord::with_nickname("ROTH IRA").nickname.as_deref(), Some("ROTH IRA"));
    }

    #[test]
    fn test_trade_side_parse() {
        assert_eq!("bUY".parse::<TradeSide>().unwrap(), TradeSide::Buy);
        assert_eq!("Sell".parse::<TradeSide>().unwrap(), TradeSide::Sell);
        assert!("hold".parse::<TradeSide>().is_err());
        assert_eq!(TradeSide::Buy.ticket_label(), "Buy");
        assert_eq!(TradeSide::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_trade_side_serialization() {
        assert_eq!(serde_json::to_string(&TradeSide::Buy).unwrap(), "\"buy\"");
        let s: TradeSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(s, TradeSide::Sell);
    }

    #[test]
    fn test_account_type() {
        assert_eq!("ROTH".parse::<AccountType>().unwrap(), AccountType::Roth);
        assert_eq!("brokerage".parse::<AccountType>().unwrap(), AccountType::Brokerage);
        assert!("joint".parse::<AccountType>().is_err());
        assert_eq!(AccountType::Roth.to_string(), "roth");

        assert!(AccountType::Roth.matches_account("123456789"));
        assert!(!AccountType::Roth.matches_account("Z12345678"));
        assert!(!AccountType::Roth.matches_account("1234567890"));
        assert!(AccountType::Brokerage.matches_account("Z12345678"));
        assert!(!AccountType::Brokerage.matches_account("123456789"));
    }
}
