//! Cash transfers between accounts of the same login.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::{FidelitySession, TRANSFER_URL};
use crate::browser::{Locator, SelectOption, WaitState};

/// Pauses the all-to-source flow takes for the form to settle; the `To`
/// dropdown repopulates asynchronously after `From` changes.
const SETTLE_AFTER_NAVIGATION: Duration = Duration::from_secs(3);
const SETTLE_AFTER_SOURCE: Duration = Duration::from_secs(3);
const SETTLE_AFTER_DESTINATION: Duration = Duration::from_secs(2);
const SETTLE_AFTER_AMOUNT: Duration = Duration::from_secs(1);

fn from_select() -> Locator {
    Locator::label("From")
}

fn to_select() -> Locator {
    Locator::label_exact("To")
}

fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}

// ---------------------------------------------------------------------------
// Plans and reports
// ---------------------------------------------------------------------------

/// An account seen in a transfer dropdown.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCandidate {
    /// Option value used to select the account.
    pub value: String,
    /// Option text as shown by the site.
    pub label: String,
    pub available: f64,
}

/// What `transfer_from_all_to_source` is about to do; shown to the
/// operator before anything moves.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub destination: String,
    pub amount_each: f64,
    pub eligible: Vec<TransferCandidate>,
    /// Accounts with less than `amount_each` available.
    pub skipped: Vec<TransferCandidate>,
}

impl TransferPlan {
    pub fn total(&self) -> f64 {
        self.amount_each * self.eligible.len() as f64
    }
}

impl fmt::Display for TransferPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transfer Summary:")?;
        writeln!(f, "To Account: {}", self.destination)?;
        writeln!(f, "Amount per account: ${:.2}", self.amount_each)?;
        writeln!(f, "Eligible accounts: {}", self.eligible.len())?;
        write!(f, "Total transfer amount: ${:.2}", self.total())?;
        if !self.skipped.is_empty() {
            write!(f, "\n\nSkipped accounts (insufficient funds):")?;
            for c in &self.skipped {
                write!(f, "\n- {}: ${:.2} available", c.label, c.available)?;
            }
        }
        Ok(())
    }
}

/// Outcome of a multi-account transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReport {
    pub succeeded: Vec<String>,
    /// Account label and the reason it failed.
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub total_transferred: f64,
}

impl TransferReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, label: &str, amount: f64, result: Result<()>) {
        match result {
            Ok(()) => {
                info!(account = %label, amount, "Transfer submitted");
                self.succeeded.push(label.to_string());
                self.total_transferred += amount;
            }
            Err(e) => {
                warn!(account = %label, error = %e, "Transfer failed");
                self.failed.push((label.to_string(), format!("{e:#}")));
            }
        }
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.succeeded {
            writeln!(f, "✓ {label}")?;
        }
        for (label, reason) in &self.failed {
            writeln!(f, "✗ {label}: {reason}")?;
        }
        writeln!(f, "Successful transfers: {}", self.succeeded.len())?;
        writeln!(f, "Failed transfers: {}", self.failed.len())?;
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped accounts: {}", self.skipped.len())?;
        }
        write!(f, "Total amount transferred: ${:.2}", self.total_transferred)
    }
}

/// Option whose text contains `needle`.
fn find_option<'a>(options: &'a [SelectOption], needle: &str) -> Option<&'a SelectOption> {
    options.iter().find(|o| o.text.contains(needle))
}

/// Real account options, excluding `exclude` (matched by value or text)
/// and the empty placeholder.
fn other_options(options: Vec<SelectOption>, exclude: &str) -> Vec<SelectOption> {
    options
        .into_iter()
        .filter(|o| !o.value.is_empty() && o.value != exclude && !o.text.contains(exclude))
        .collect()
}

// ---------------------------------------------------------------------------
// Transfer scripts
// ---------------------------------------------------------------------------

impl FidelitySession {
    async fn open_transfer_page(&mut self) -> Result<()> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.page.goto(TRANSFER_URL).await?;
        self.wait_for_loading().await
    }

    /// Select the option containing `needle`; returns its value.
    async fn select_containing(&self, select: &Locator, needle: &str, which: &str) -> Result<String> {
        let options = self.page.options(select).await?;
        let option = find_option(&options, needle)
            .with_context(|| format!("Account {needle} not found in '{which}' dropdown"))?;
        self.page.select_option(select, &option.value).await?;
        self.wait_for_loading().await?;
        Ok(option.value.clone())
    }

    async fn fill_amount(&self, amount: f64) -> Result<()> {
        self.page
            .fill(&Locator::css("#transfer-amount"), &format_amount(amount))
            .await?;
        Ok(())
    }

    /// Fill the amount, continue, submit and wait for the confirmation.
    async fn submit_transfer(&self, amount: f64) -> Result<()> {
        self.fill_amount(amount).await?;
        self.confirm_transfer().await
    }

    async fn confirm_transfer(&self) -> Result<()> {
        self.page.click(&Locator::role_named("button", "Continue")).await?;
        self.wait_for_loading().await?;
        self.page.click(&Locator::role_named("button", "Submit")).await?;
        self.wait_for_loading().await?;
        self.page
            .wait_for(
                &Locator::text("Request submitted"),
                WaitState::Visible,
                self.cfg.timeouts.loading(),
            )
            .await
            .context("Transfer submission failed")?;
        Ok(())
    }

    /// Move `amount` from `source` to `destination`. Both are matched as
    /// substrings of the dropdown texts.
    pub async fn transfer_acc_to_acc(&mut self, source: &str, destination: &str, amount: f64) -> Result<()> {
        self.open_transfer_page().await?;
        self.select_containing(&from_select(), source, "From").await?;
        self.select_containing(&to_select(), destination, "To").await?;

        let available = self.available_balance().await?;
        if amount > available {
            bail!("Insufficient funds. Available: ${available:.2}, Attempted transfer: ${amount:.2}");
        }
        self.submit_transfer(amount).await?;
        info!(%source, %destination, amount, "Transfer submitted");
        Ok(())
    }

    /// Send `amount` from `source` to every other account.
    ///
    /// Refused up front when the source cannot cover every transfer.
    pub async fn transfer_from_source_to_all(&mut self, source: &str, amount: f64) -> Result<TransferReport> {
        self.open_transfer_page().await?;
        let source_value = self.select_containing(&from_select(), source, "From").await?;
        let available = self.available_balance().await?;

        let destinations = other_options(self.page.options(&to_select()).await?, &source_value);
        let needed = amount * destinations.len() as f64;
        if needed > available {
            bail!("Insufficient funds. Need: ${needed:.2}, Available: ${available:.2}");
        }
        info!(
            %source,
            amount,
            accounts = destinations.len(),
            total = needed,
            available,
            "Transferring to every account"
        );

        let mut report = TransferReport::default();
        for (i, dest) in destinations.iter().enumerate() {
            if i > 0 {
                // The form is spent after a submission; start over.
                let reset = async {
                    self.open_transfer_page().await?;
                    self.page.select_option(&from_select(), &source_value).await?;
                    self.wait_for_loading().await
                };
                if let Err(e) = reset.await {
                    report.failed.push((dest.text.clone(), format!("{e:#}")));
                    continue;
                }
            }
            let attempt = async {
                self.page.select_option(&to_select(), &dest.value).await?;
                self.wait_for_loading().await?;
                self.submit_transfer(amount).await
            };
            let result = attempt.await;
            report.record(&dest.text, amount, result);
        }
        Ok(report)
    }

    /// Pull `amount` from every other account that has it into
    /// `destination`. `confirm` sees the plan and decides whether to go on.
    pub async fn transfer_from_all_to_source<F>(
        &mut self,
        destination: &str,
        amount: f64,
        confirm: F,
    ) -> Result<TransferReport>
    where
        F: FnOnce(&TransferPlan) -> bool,
    {
        self.open_transfer_page().await?;
        let sources = other_options(self.page.options(&from_select()).await?, destination);

        let mut plan = TransferPlan {
            destination: destination.to_string(),
            amount_each: amount,
            eligible: Vec::new(),
            skipped: Vec::new(),
        };
        for option in sources {
            self.page.select_option(&from_select(), &option.value).await?;
            self.wait_for_loading().await?;
            let candidate = TransferCandidate {
                available: self.available_balance().await?,
                value: option.value,
                label: option.text,
            };
            if candidate.available >= amount {
                plan.eligible.push(candidate);
            } else {
                plan.skipped.push(candidate);
            }
        }

        if plan.eligible.is_empty() {
            bail!("No eligible accounts found with sufficient funds");
        }
        if !confirm(&plan) {
            bail!("Transfers cancelled");
        }

        let mut report = TransferReport {
            skipped: plan.skipped.iter().map(|c| c.label.clone()).collect(),
            ..TransferReport::default()
        };
        for source in &plan.eligible {
            let result = self.pull_into(&source.value, destination, amount).await;
            report.record(&source.label, amount, result);
        }
        Ok(report)
    }

    async fn pull_into(&mut self, source_value: &str, destination: &str, amount: f64) -> Result<()> {
        self.page.goto(TRANSFER_URL).await?;
        self.wait_for_loading().await?;
        tokio::time::sleep(SETTLE_AFTER_NAVIGATION).await;

        self.page.select_option(&from_select(), source_value).await?;
        self.wait_for_loading().await?;
        tokio::time::sleep(SETTLE_AFTER_SOURCE).await;

        self.page.click(&to_select()).await?;
        tokio::time::sleep(SETTLE_AFTER_DESTINATION).await;
        self.select_containing(&to_select(), destination, "To").await?;
        tokio::time::sleep(SETTLE_AFTER_DESTINATION).await;

        self.fill_amount(amount).await?;
        tokio::time::sleep(SETTLE_AFTER_AMOUNT).await;
        self.confirm_transfer().await
    }
}
