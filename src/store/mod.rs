//! In-memory account aggregation.
//!
//! Two independent scrapes feed one `AccountStore`: the transfer page's
//! account dropdown (number, nickname, withdrawable cash) and the
//! positions CSV (balance and holdings). The merges here are pure so the
//! browser scripts only have to hand over what they observed.
//!
//! Merge policy: the first observation creates the record. Later stock
//! entries for the same account are appended and their value added to the
//! balance, unless an overwrite is requested. Nickname and withdrawable
//! cash are only replaced on overwrite (or when still unset).

pub mod dropdown;

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{AccountRecord, HoldingSummary, PositionRecord};

pub use dropdown::{parse_balance_cell, parse_option_text, DropdownEntry};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Rejected store mutations. A rejected mutation leaves the store untouched.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("account {account} already exists")]
    AccountExists { account: String },

    #[error("account {account} is not in the store")]
    UnknownAccount { account: String },

    #[error("invalid position record: {reason}")]
    InvalidPosition { reason: String },
}

/// What a merge did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Accounts keyed by account number, iterated in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct AccountStore {
    accounts: HashMap<String, AccountRecord>,
    order: Vec<String>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, account: &str) -> bool {
        self.accounts.contains_key(account)
    }

    pub fn get(&self, account: &str) -> Option<&AccountRecord> {
        self.accounts.get(account)
    }

    /// Accounts in the order they were first observed.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AccountRecord)> {
        self.order
            .iter()
            .filter_map(|k| self.accounts.get(k).map(|r| (k.as_str(), r)))
    }

    pub fn account_numbers(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Create `account`, or replace it when `overwrite` is set.
    ///
    /// Fails when the account exists and `overwrite` is false, or when any
    /// of the record's positions is invalid.
    pub fn set_account(
        &mut self,
        account: &str,
        record: AccountRecord,
        overwrite: bool,
    ) -> Result<MergeOutcome, StoreError> {
        let exists = self.accounts.contains_key(account);
        if exists && !overwrite {
            return Err(StoreError::AccountExists {
                account: account.to_string(),
            });
        }
        for position in &record.positions {
            position
                .validate()
                .map_err(|reason| StoreError::InvalidPosition { reason })?;
        }

        if !exists {
            self.order.push(account.to_string());
        }
        self.accounts.insert(account.to_string(), record);
        Ok(if exists {
            MergeOutcome::Updated
        } else {
            MergeOutcome::Created
        })
    }

    /// Add a holding to an existing account.
    ///
    /// Appends the position and adds its value to the balance. With
    /// `overwrite` the position list becomes just this position and the
    /// balance becomes its value. Duplicate tickers are appended as-is.
    pub fn add_stock(
        &mut self,
        account: &str,
        position: PositionRecord,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        position
            .validate()
            .map_err(|reason| StoreError::InvalidPosition { reason })?;
        let record = self.record_mut(account)?;

        if overwrite {
            record.balance = position.value;
            record.positions = vec![position];
        } else {
            record.balance += position.value;
            record.positions.push(position);
        }
        Ok(())
    }

    /// Like [`add_stock`](Self::add_stock) for an untyped record such as
    /// one read back from JSON. Missing or mistyped fields are rejected.
    pub fn add_stock_value(
        &mut self,
        account: &str,
        position: &Value,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let position = PositionRecord::try_from(position)?;
        self.add_stock(account, position, overwrite)
    }

    /// Set the withdrawable cash when overwriting or while it is still 0.
    /// Returns whether the value was written.
    pub fn add_withdrawal_balance(
        &mut self,
        account: &str,
        amount: f64,
        overwrite: bool,
    ) -> Result<bool, StoreError> {
        let record = self.record_mut(account)?;
        if overwrite || record.withdrawal_balance == 0.0 {
            record.withdrawal_balance = amount;
            return Ok(true);
        }
        Ok(false)
    }

    /// Set the nickname when overwriting or while it is unset.
    /// Returns whether the value was written.
    pub fn add_nickname(
        &mut self,
        account: &str,
        nickname: &str,
        overwrite: bool,
    ) -> Result<bool, StoreError> {
        let record = self.record_mut(account)?;
        if overwrite || record.nickname.is_none() {
            record.nickname = Some(nickname.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    /// Merge one dropdown observation. New accounts are created with a zero
    /// balance; existing ones get nickname and withdrawable cash updated
    /// (replaced when `overwrite`, filled in when unset otherwise). Balance
    /// and positions are never touched here.
    pub fn merge_dropdown(&mut self, entry: DropdownEntry, overwrite: bool) -> MergeOutcome {
        let withdrawal = entry.withdrawal_balance.unwrap_or(0.0);
        if let Some(record) = self.accounts.get_mut(&entry.account) {
            if overwrite || record.withdrawal_balance == 0.0 {
                record.withdrawal_balance = withdrawal;
            }
            if overwrite || record.nickname.is_none() {
                record.nickname = Some(entry.nickname);
            }
            debug!(account = %entry.account, "Dropdown entry merged into existing account");
            return MergeOutcome::Updated;
        }

        self.order.push(entry.account.clone());
        self.accounts.insert(
            entry.account,
            AccountRecord {
                withdrawal_balance: withdrawal,
                nickname: Some(entry.nickname),
                ..AccountRecord::default()
            },
        );
        MergeOutcome::Created
    }

    /// Apply one positions-CSV row: create the account with the row's value
    /// as its balance, or append the position to the existing account.
    pub fn record_position(
        &mut self,
        account: &str,
        nickname: &str,
        position: PositionRecord,
    ) -> Result<MergeOutcome, StoreError> {
        if self.contains(account) {
            self.add_stock(account, position, false)?;
            return Ok(MergeOutcome::Updated);
        }
        let record = AccountRecord {
            balance: position.value,
            withdrawal_balance: 0.0,
            nickname: Some(nickname.to_string()),
            positions: vec![position],
        };
        self.set_account(account, record, false)
    }

    /// Ticker → quantity for one account, `None` if the account is unknown.
    /// With duplicate tickers the last entry wins.
    pub fn stocks_in_account(&self, account: &str) -> Option<BTreeMap<String, f64>> {
        let record = self.accounts.get(account)?;
        Some(
            record
                .positions
                .iter()
                .map(|p| (p.ticker.clone(), p.quantity))
                .collect(),
        )
    }

    /// Every ticker held anywhere with quantity and value summed across
    /// accounts. The last price is taken from the first holding seen.
    pub fn summary_holdings(&self) -> BTreeMap<String, HoldingSummary> {
        let mut out: BTreeMap<String, HoldingSummary> = BTreeMap::new();
        for (_, record) in self.iter() {
            for p in &record.positions {
                out.entry(p.ticker.clone())
                    .and_modify(|h| {
                        h.quantity += p.quantity;
                        h.value += p.value;
                    })
                    .or_insert(HoldingSummary {
                        quantity: p.quantity,
                        last_price: p.last_price,
                        value: p.value,
                    });
            }
        }
        out
    }

    /// Sum of all account balances.
    pub fn total_balance(&self) -> f64 {
        self.accounts.values().map(|r| r.balance).sum()
    }

    fn record_mut(&mut self, account: &str) -> Result<&mut AccountRecord, StoreError> {
        self.accounts.get_mut(account).ok_or_else(|| {
            warn!(account, "Store update for unknown account");
            StoreError::UnknownAccount {
                account: account.to_string(),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Untyped records
// ---------------------------------------------------------------------------

fn required_field<'a>(record: &'a Value, name: &str) -> Result<&'a Value, StoreError> {
    match record.get(name) {
        None | Some(Value::Null) => Err(StoreError::InvalidPosition {
            reason: format!("missing field '{name}'"),
        }),
        Some(v) => Ok(v),
    }
}

fn float_field(record: &Value, name: &str) -> Result<f64, StoreError> {
    let v = required_field(record, name)?;
    match v.as_f64() {
        Some(f) if v.is_f64() => Ok(f),
        _ => Err(StoreError::InvalidPosition {
            reason: format!("field '{name}' must be a float, got {v}"),
        }),
    }
}

impl TryFrom<&Value> for PositionRecord {
    type Error = StoreError;

    /// All four fields must be present and non-null; `ticker` must be a
    /// string and the numeric fields JSON floats.
    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let ticker = required_field(value, "ticker")?
            .as_str()
            .ok_or_else(|| StoreError::InvalidPosition {
                reason: "field 'ticker' must be a string".to_string(),
            })?
            .to_string();
        let position = PositionRecord {
            ticker,
            quantity: float_field(value, "quantity")?,
            last_price: float_field(value, "last_price")?,
            value: float_field(value, "value")?,
        };
        position
            .validate()
            .map_err(|reason| StoreError::InvalidPosition { reason })?;
        Ok(position)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
