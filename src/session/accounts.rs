//! Account discovery, positions export and account opening.

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use super::{FidelitySession, BROKERAGE_OPENING_URL, POSITIONS_URL, ROTH_OPENING_URL, TRANSFER_URL};
use crate::browser::{Locator, WaitState};
use crate::positions;
use crate::store::{parse_option_text, AccountStore, DropdownEntry, MergeOutcome};
use crate::types::AccountType;

/// Delay for the balance table to refresh after a dropdown change.
const BALANCE_REFRESH_MS: u64 = 100;

const ACCOUNT_NUMBER_PREFIX: &str = "Your account number is";

impl FidelitySession {
    /// Read every account from the transfer page's "From" dropdown.
    ///
    /// With `with_balance` each account is selected in turn so its
    /// withdrawable cash can be read from the balance table.
    pub async fn fetch_dropdown_entries(&mut self, with_balance: bool) -> Result<Vec<DropdownEntry>> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.page.goto(TRANSFER_URL).await?;
        self.wait_for_loading().await?;

        let from = Locator::label("From");
        let options = self.page.options(&from).await?;
        let mut entries = Vec::new();
        for option in options {
            let Some((account, nickname)) = parse_option_text(&option.text) else {
                continue;
            };
            let withdrawal_balance = if with_balance {
                self.page.select_option(&from, &option.value).await?;
                self.page.wait_for_timeout(BALANCE_REFRESH_MS).await;
                Some(self.available_balance().await?)
            } else {
                None
            };
            entries.push(DropdownEntry {
                account,
                nickname,
                withdrawal_balance,
            });
        }
        debug!(accounts = entries.len(), "Account dropdown read");
        Ok(entries)
    }

    /// Merge the dropdown accounts into the session store, replacing
    /// nicknames and withdrawable cash of accounts already known.
    pub async fn get_list_of_accounts(&mut self, with_balance: bool) -> Result<&AccountStore> {
        let entries = self.fetch_dropdown_entries(with_balance).await?;
        let mut created = 0;
        for entry in entries {
            if self.store.merge_dropdown(entry, true) == MergeOutcome::Created {
                created += 1;
            }
        }
        info!(accounts = self.store.len(), created, "Account list refreshed");
        Ok(&self.store)
    }

    /// Same scrape as `get_list_of_accounts` but into a fresh store, leaving
    /// the session store untouched.
    pub async fn account_snapshot(&mut self, with_balance: bool) -> Result<AccountStore> {
        let mut snapshot = AccountStore::new();
        for entry in self.fetch_dropdown_entries(with_balance).await? {
            snapshot.merge_dropdown(entry, true);
        }
        Ok(snapshot)
    }

    /// Download the positions export and merge it into the store.
    pub async fn get_account_info(&mut self) -> Result<&AccountStore> {
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.page.goto(POSITIONS_URL).await?;
        self.wait_for_loading().await?;

        self.page.begin_download();
        self.page.click(&Locator::label("Download Positions")).await?;
        let download = self
            .page
            .wait_for_download(self.cfg.timeouts.long_loading())
            .await?;

        let dest = std::env::current_dir()?.join(&download.suggested_filename);
        download.save_as(&dest)?;
        positions::import_positions_file(&mut self.store, &dest)
            .with_context(|| format!("Failed to import {}", dest.display()))?;
        Ok(&self.store)
    }

    /// Open a new account and return its number (also kept in
    /// `new_account_number`).
    pub async fn open_account(&mut self, account_type: AccountType) -> Result<String> {
        let result = match account_type {
            AccountType::Roth => self.open_roth().await,
            AccountType::Brokerage => self.open_brokerage().await,
        };
        match result {
            Ok(number) => {
                info!(%account_type, account = %number, "Account opened");
                self.new_account_number = Some(number.clone());
                Ok(number)
            }
            Err(e) => {
                warn!(%account_type, error = %e, "Account opening failed");
                self.capture_failure("open_account").await;
                Err(e)
            }
        }
    }

    async fn open_roth(&mut self) -> Result<String> {
        self.page.goto(ROTH_OPENING_URL).await?;
        self.wait_for_loading().await?;

        self.page
            .click(&Locator::role_named("button", "Open account"))
            .await?;
        self.wait_for_loading_sign(self.cfg.timeouts.long_loading()).await?;
        self.page
            .wait_for(
                &Locator::role_named("heading", "Congratulations, your account"),
                WaitState::Visible,
                self.cfg.timeouts.loading(),
            )
            .await?;

        let heading = self
            .page
            .text_content(&Locator::role_named("heading", ACCOUNT_NUMBER_PREFIX))
            .await?;
        let number = heading.replace(ACCOUNT_NUMBER_PREFIX, "").trim().to_string();
        if number.is_empty() {
            bail!("Account number missing from confirmation heading {heading:?}");
        }
        Ok(number)
    }

    async fn open_brokerage(&mut self) -> Result<String> {
        let before = self.account_snapshot(false).await?;

        self.page.goto(BROKERAGE_OPENING_URL).await?;
        self.wait_for_loading().await?;

        // Skipped by the site when an application is already in progress.
        if self
            .page
            .is_visible(&Locator::role_named("heading", "Account ownership"))
            .await?
        {
            self.page.click(&Locator::role_named("button", "Next")).await?;
            self.wait_for_loading().await?;
        }
        self.page.click(&Locator::role_named("button", "Next")).await?;
        self.wait_for_loading().await?;

        self.page
            .click(&Locator::role_named("button", "Open account"))
            .await?;
        self.wait_for_loading_sign(self.cfg.timeouts.long_loading()).await?;
        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        self.wait_for_loading().await?;

        let after = self.account_snapshot(false).await?;
        self.new_account_number = None;
        new_account(&before, &after).context("No new account appeared after opening")
    }
}

/// First account present in `after` but not in `before`.
pub(crate) fn new_account(before: &AccountStore, after: &AccountStore) -> Option<String> {
    after
        .account_numbers()
        .into_iter()
        .find(|acct| !before.contains(acct))
}
