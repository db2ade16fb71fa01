//! Account features: penny-stock trading and nicknames.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use super::{FidelitySession, FEATURES_URL, SUMMARY_URL};
use crate::browser::{self, Locator, WaitState};

const START_TIMEOUT: Duration = Duration::from_secs(15);
const SELECT_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(30);
const ENABLED_TIMEOUT: Duration = Duration::from_secs(15);
const DROPDOWN_SETTLE_MS: u64 = 1_000;

/// The site lands on either of these after "Continue".
const TERMS_URLS: [&str; 2] = [
    "https://digital.fidelity.com/ftgw/digital/easy/hrt/pst/termsandconditions",
    "https://digital.fidelity.com/ftgw/digital/brokerage-host/psta/TermsAndCondtions",
];

const CUSTOMIZE_TEST_ID: &str = "ap143528-account-customize-open-button";
const CUSTOMIZE_INPUT_TEST_ID: &str = "ap143528-account-customize-account-input";

/// How one pass through the penny-stock flow ended.
#[derive(Debug, Clone, PartialEq)]
enum PennyAttempt {
    Enabled,
    NotEnabled(String),
    /// The spinner after "Continue" never went away.
    SpinnerTimedOut,
}

fn eligible_accounts() -> Locator {
    Locator::label("Your eligible accounts")
}

pub(crate) fn is_terms_page(url: &str) -> bool {
    TERMS_URLS.iter().any(|terms| url.contains(terms))
}

/// Result of the spinner wait after "Continue": `Some(SpinnerTimedOut)`
/// when it timed out, `None` when the flow can go on.
fn spinner_outcome(wait: Result<()>) -> Result<Option<PennyAttempt>> {
    match wait {
        Ok(()) => Ok(None),
        Err(e) if browser::is_timeout(&e) => Ok(Some(PennyAttempt::SpinnerTimedOut)),
        Err(e) => Err(e),
    }
}

impl FidelitySession {
    /// Enable penny-stock trading for one account number (no nickname, no
    /// parentheses).
    ///
    /// A spinner that never clears after "Continue" is retried with backoff
    /// up to the configured attempt limit.
    pub async fn enable_pennystock_trading(&mut self, account: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            let wait = self.retry.backoff_for(attempt);
            if !wait.is_zero() {
                debug!(attempt, wait_ms = wait.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(wait).await;
            }

            let outcome = match self.penny_attempt(account).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.capture_failure("pennystock").await;
                    return Err(e);
                }
            };
            match outcome {
                PennyAttempt::Enabled => {
                    info!(%account, "Penny stock trading enabled");
                    return Ok(());
                }
                PennyAttempt::NotEnabled(reason) => {
                    self.capture_failure("pennystock").await;
                    bail!("Penny stock trading not enabled for {account}: {reason}");
                }
                PennyAttempt::SpinnerTimedOut if self.retry.should_retry(attempt) => {
                    warn!(%account, attempt, "Loading spinner stuck, starting over");
                    attempt += 1;
                }
                PennyAttempt::SpinnerTimedOut => {
                    self.capture_failure("pennystock").await;
                    bail!("Loading spinner never cleared for {account} after {attempt} attempts");
                }
            }
        }
    }

    async fn penny_attempt(&mut self, account: &str) -> Result<PennyAttempt> {
        self.open_penny_flow().await?;

        // Checkbox and dropdown variants of the account picker both exist.
        let checkbox = Locator::css("label").has_text(account);
        if self.page.is_visible(&checkbox).await? {
            self.page.click(&checkbox).await?;
        }
        if self.page.is_visible(&eligible_accounts()).await? {
            self.page.select_option(&eligible_accounts(), account).await?;
        }

        self.page.click(&Locator::role_named("button", "Continue")).await?;
        let wait = self.wait_for_loading_sign(self.cfg.timeouts.long_loading()).await;
        if let Some(stuck) = spinner_outcome(wait)? {
            return Ok(stuck);
        }
        self.accept_penny_terms().await
    }

    /// Features page → Manage Penny Stock Trading → Start, then wait for
    /// the account picker.
    async fn open_penny_flow(&mut self) -> Result<()> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.page.goto(FEATURES_URL).await?;
        self.page
            .click(&Locator::label("Manage Penny Stock Trading"))
            .await?;
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.wait_for_loading().await?;

        self.page
            .click_within(&Locator::role_named("button", "Start"), START_TIMEOUT)
            .await?;
        self.page.reload().await?;
        self.wait_for_loading().await?;

        self.page
            .wait_for(
                &Locator::role_named("heading", "Select an account"),
                WaitState::Visible,
                SELECT_ACCOUNT_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn accept_penny_terms(&mut self) -> Result<PennyAttempt> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.wait_for_loading().await?;

        let url = self.page.url().await?;
        if !is_terms_page(&url) {
            return Ok(PennyAttempt::NotEnabled(format!(
                "terms page not reached (at {url})"
            )));
        }

        self.page.click(&Locator::css(".pvd-checkbox__label")).await?;
        self.page.click(&Locator::role_named("button", "Submit")).await?;
        self.wait_for_loading().await?;
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.wait_for_loading().await?;

        let enabled = self
            .page
            .wait_for(
                &Locator::text("Your account is now enabled."),
                WaitState::Visible,
                ENABLED_TIMEOUT,
            )
            .await;
        match enabled {
            Ok(()) => Ok(PennyAttempt::Enabled),
            Err(e) if e.is_timeout() => Ok(PennyAttempt::NotEnabled(
                "could not verify the confirmation ribbon".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Enable penny-stock trading for every account in the eligible-accounts
    /// dropdown. Stops at the first failure; returns the accounts enabled.
    pub async fn enable_all_pennystock_trading(&mut self) -> Result<Vec<String>> {
        self.open_penny_flow().await?;
        if !self.page.is_visible(&eligible_accounts()).await? {
            bail!("Eligible accounts dropdown not found");
        }

        let accounts: Vec<String> = self
            .page
            .options(&eligible_accounts())
            .await?
            .into_iter()
            .map(|o| o.value)
            .filter(|v| !v.is_empty())
            .collect();

        let mut enabled = Vec::new();
        for (i, account) in accounts.iter().enumerate() {
            if i > 0 {
                self.open_penny_flow().await?;
            }
            self.page.select_option(&eligible_accounts(), account).await?;
            self.page.wait_for_timeout(DROPDOWN_SETTLE_MS).await;
            self.page.click(&Locator::role_named("button", "Continue")).await?;
            let wait = self.wait_for_loading_sign(self.cfg.timeouts.long_loading()).await;
            let attempt = match spinner_outcome(wait)? {
                Some(stuck) => stuck,
                None => self.accept_penny_terms().await?,
            };

            match attempt {
                PennyAttempt::Enabled => {
                    info!(%account, "Penny stock trading enabled");
                    enabled.push(account.clone());
                }
                PennyAttempt::NotEnabled(reason) => {
                    self.capture_failure("pennystock_all").await;
                    bail!(
                        "Penny stock trading not enabled for {account} ({} enabled before it): {reason}",
                        enabled.len()
                    );
                }
                PennyAttempt::SpinnerTimedOut => {
                    self.capture_failure("pennystock_all").await;
                    bail!(
                        "Loading spinner never cleared for {account} ({} enabled before it)",
                        enabled.len()
                    );
                }
            }
        }
        Ok(enabled)
    }

    /// Rename an account from the summary page's customize dialog.
    pub async fn nickname_account(&mut self, account: &str, nickname: &str) -> Result<()> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.page.goto(SUMMARY_URL).await?;
        self.wait_for_loading().await?;

        let customize = Locator::label_exact("Customize Accounts");
        self.page
            .wait_for(&customize, WaitState::Visible, self.cfg.timeouts.loading())
            .await?;
        let new_view = self
            .page
            .is_visible(&Locator::test_id(CUSTOMIZE_TEST_ID).locate(Locator::label("Customize Accounts")))
            .await?;
        self.page.click(&customize).await?;
        self.page
            .wait_for(
                &Locator::text("Display preferences"),
                WaitState::Visible,
                self.cfg.timeouts.loading(),
            )
            .await?;

        let item = Locator::css(".custom-modal__accounts-item");
        self.page
            .wait_for(&item.clone().first(), WaitState::Visible, self.cfg.timeouts.loading())
            .await?;
        let mut selected = None;
        for i in 0..self.page.count(&item).await? {
            let entry = item.clone().nth(i);
            if self.page.inner_text(&entry).await?.contains(account) {
                selected = Some(entry);
                break;
            }
        }
        let Some(entry) = selected else {
            bail!("Account {account} not found in the customize dialog");
        };
        self.page.click(&entry).await?;
        self.page.click(&Locator::role_named("button", "Rename")).await?;

        let textbox = if new_view {
            Locator::test_id(CUSTOMIZE_INPUT_TEST_ID).locate(Locator::role("textbox"))
        } else {
            Locator::label_exact("Accounts").locate(Locator::role("textbox"))
        };
        self.page.fill(&textbox, nickname).await?;
        self.page.click(&Locator::role_named("button", "save")).await?;
        // Saving shows two spinners in a row.
        self.wait_for_loading().await?;
        self.wait_for_loading().await?;

        if self.store.contains(account) {
            self.store.add_nickname(account, nickname, true)?;
        }
        info!(%account, %nickname, new_view, "Account renamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserError;

    #[test]
    fn test_terms_page_variants() {
        assert!(is_terms_page(
            "https://digital.fidelity.com/ftgw/digital/easy/hrt/pst/termsandconditions?acct=Z1"
        ));
        assert!(is_terms_page(
            "https://digital.fidelity.com/ftgw/digital/brokerage-host/psta/TermsAndCondtions"
        ));
        assert!(!is_terms_page("https://digital.fidelity.com/ftgw/digital/portfolio/features"));
    }

    #[test]
    fn test_spinner_timeout_becomes_attempt() {
        let timed_out: Result<()> = Err(anyhow::Error::new(BrowserError::Timeout {
            what: "pvd-loading-spinner to be hidden".into(),
            duration: Duration::from_secs(60),
        }));
        assert_eq!(
            spinner_outcome(timed_out).unwrap(),
            Some(PennyAttempt::SpinnerTimedOut)
        );

        assert_eq!(spinner_outcome(Ok(())).unwrap(), None);

        let gone: Result<()> = Err(anyhow::Error::new(BrowserError::ElementNotFound {
            locator: "pvd-loading-spinner".into(),
        }));
        assert!(spinner_outcome(gone).is_err());
    }
}
