//! Parsing of the transfer page's account dropdown.
//!
//! Option texts look like `Individual (Z12345678)` or
//! `ROTH IRA (123456789)`. Anything else (placeholders, external bank
//! accounts) is ignored.

use std::sync::OnceLock;

use regex::Regex;

/// One account observed in the dropdown.
#[derive(Debug, Clone, PartialEq)]
pub struct DropdownEntry {
    pub account: String,
    pub nickname: String,
    /// Present only when the balance cell was scraped for this option.
    pub withdrawal_balance: Option<f64>,
}

fn account_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(((?:Z|\d)\d{6,})\)").expect("hardcoded regex"))
}

fn nickname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\(").expect("hardcoded regex"))
}

/// Split an option text into `(account_number, nickname)`.
///
/// The account number is a `Z` or digit followed by at least six more
/// digits, inside parentheses. Both parts must be present.
pub fn parse_option_text(text: &str) -> Option<(String, String)> {
    let account = account_re().captures(text)?.get(1)?.as_str().to_string();
    let nickname = nickname_re().captures(text)?.get(1)?.as_str().trim().to_string();
    if nickname.is_empty() {
        return None;
    }
    Some((account, nickname))
}

/// Parse a currency cell such as `$1,234.56`.
pub fn parse_balance_cell(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_brokerage_option() {
        let (acct, nick) = parse_option_text("Individual (Z12345678)").unwrap();
        assert_eq!(acct, "Z12345678");
        assert_eq!(nick, "Individual");
    }

    #[test]
    fn test_parse_numeric_option() {
        let (acct, nick) = parse_option_text("ROTH IRA 3 (123456789)").unwrap();
        assert_eq!(acct, "123456789");
        assert_eq!(nick, "ROTH IRA 3");
    }

    #[test]
    fn test_parse_rejects_short_or_missing_numbers() {
        assert!(parse_option_text("Select an account").is_none());
        assert!(parse_option_text("Checking (12345)").is_none());
        assert!(parse_option_text("(Z12345678)").is_none());
        assert!(parse_option_text("Bank (X12345678)").is_none());
    }

    #[test]
    fn test_parse_balance_cell() {
        assert_eq!(parse_balance_cell("$1,234.56"), Some(1234.56));
        assert_eq!(parse_balance_cell(" $0.00 "), Some(0.0));
        assert_eq!(parse_balance_cell("--"), None);
    }
}
