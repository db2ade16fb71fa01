//! Monthly statement downloads from the documents hub.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use super::{FidelitySession, DOCHUB_URL};
use crate::browser::Locator;

/// Month names as the documents hub spells them.
const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "March", "April", "May", "June", "July", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Error, PartialEq)]
#[error("expected a statement period as MM/YYYY, got {input:?}")]
pub struct InvalidPeriod {
    input: String,
}

/// A statement month, parsed from `MM/YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementPeriod {
    month: u32,
    year: u32,
}

impl StatementPeriod {
    pub fn new(month: u32, year: u32) -> Result<Self, InvalidPeriod> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(InvalidPeriod {
                input: format!("{month:02}/{year}"),
            });
        }
        Ok(Self { month, year })
    }

    pub fn parse(input: &str) -> Result<Self, InvalidPeriod> {
        let invalid = || InvalidPeriod {
            input: input.to_string(),
        };
        let (month, year) = input.trim().split_once('/').ok_or_else(invalid)?;
        if year.len() != 4 {
            return Err(invalid());
        }
        let month = month.parse().map_err(|_| invalid())?;
        let year = year.parse().map_err(|_| invalid())?;
        Self::new(month, year).map_err(|_| invalid())
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> u32 {
        self.year
    }

    /// Row label prefix on the documents hub, e.g. `March 2024`.
    pub fn label(&self) -> String {
        let name = self
            .month
            .checked_sub(1)
            .and_then(|i| MONTH_LABELS.get(i as usize))
            .copied()
            .unwrap_or("?");
        format!("{name} {}", self.year)
    }

    fn row_name(&self) -> String {
        format!("{} — Statement (pdf)", self.label())
    }
}

impl FromStr for StatementPeriod {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StatementPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

impl FidelitySession {
    /// Download the statement for `period` into the working directory and
    /// return its path.
    pub async fn download_prev_statement(&mut self, period: StatementPeriod) -> Result<PathBuf> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.page.goto(DOCHUB_URL).await?;
        self.wait_for_loading().await?;

        let row = Locator::role_named("row", &period.row_name());
        self.page
            .click(&row.locate(Locator::label("download statement")))
            .await?;

        self.page.begin_download();
        self.page
            .click(&Locator::role_named("menuitem", "Download as PDF"))
            .await?;
        let download = self
            .page
            .wait_for_download(self.cfg.timeouts.long_loading())
            .await?;

        let dest = std::env::current_dir()?.join(&download.suggested_filename);
        download.save_as(&dest)?;

        // The PDF opens a viewer tab alongside the download.
        let closed = self.page.close_other_pages().await?;
        debug!(closed, "Closed statement popups");
        info!(%period, path = %dest.display(), "Statement downloaded");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period() {
        let p = StatementPeriod::parse("03/2024").unwrap();
        assert_eq!((p.month(), p.year()), (3, 2024));
        assert_eq!(p, StatementPeriod::new(3, 2024).unwrap());
        assert_eq!(p.label(), "March 2024");
        assert_eq!(p.to_string(), "03/2024");
    }

    #[test]
    fn test_site_month_spelling() {
        assert_eq!(StatementPeriod::new(1, 2023).unwrap().label(), "Jan 2023");
        assert_eq!(StatementPeriod::new(7, 2023).unwrap().label(), "July 2023");
        assert_eq!(StatementPeriod::new(9, 2023).unwrap().label(), "Sep 2023");
    }

    #[test]
    fn test_row_name() {
        let p: StatementPeriod = "12/2023".parse().unwrap();
        assert_eq!(p.row_name(), "Dec 2023 — Statement (pdf)");
    }

    #[test]
    fn test_label_never_panics_on_out_of_range_month() {
        let zero = StatementPeriod { month: 0, year: 2024 };
        assert_eq!(zero.label(), "? 2024");
        let thirteen = StatementPeriod { month: 13, year: 2024 };
        assert_eq!(thirteen.label(), "? 2024");
        assert!(StatementPeriod::new(0, 2024).is_err());
        assert!(StatementPeriod::new(13, 2024).is_err());
    }

    #[test]
    fn test_invalid_periods() {
        for bad in ["13/2024", "00/2024", "3-2024", "03/24", "ab/2024", ""] {
            assert!(StatementPeriod::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
