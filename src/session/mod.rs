//! A logged-in (or logging-in) brokerage session.
//!
//! `FidelitySession` owns the browser, the page and the account store for
//! one credential set. The scripts that drive individual site features
//! live in the submodules and are all methods on the session.

mod accounts;
mod features;
mod login;
mod statements;
mod trade;
mod transfer;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

use crate::browser::{self, BrowserProcess, Locator, Page, WaitState};
use crate::config::AppConfig;
use crate::retry::RetryPolicy;
use crate::storage::{self, StorageState};
use crate::store::AccountStore;
use crate::types::HoldingSummary;

pub use statements::{InvalidPeriod, StatementPeriod};
pub use trade::{clean_error_banner, format_quantity, limit_price, OrderRequest, TradeError};
pub use transfer::{TransferPlan, TransferReport};

// ---------------------------------------------------------------------------
// Site map
// ---------------------------------------------------------------------------

pub const LOGIN_URL: &str = "https://digital.fidelity.com/prgw/digital/login/full-page";
pub const SUMMARY_URL: &str = "https://digital.fidelity.com/ftgw/digital/portfolio/summary";
pub const POSITIONS_URL: &str = "https://digital.fidelity.com/ftgw/digital/portfolio/positions";
pub const TRANSFER_URL: &str =
    "https://digital.fidelity.com/ftgw/digital/transfer/?quicktransfer=cash-shares";
pub const ORDER_ENTRY_URL: &str =
    "https://digital.fidelity.com/ftgw/digital/trade-equity/index/orderEntry";
pub const FEATURES_URL: &str = "https://digital.fidelity.com/ftgw/digital/portfolio/features";
pub const DOCHUB_URL: &str = "https://digital.fidelity.com/ftgw/digital/portfolio/documents/dochub";
pub const ROTH_OPENING_URL: &str =
    "https://digital.fidelity.com/ftgw/digital/aox/RothIRAccountOpening/PersonalInformation";
pub const BROKERAGE_OPENING_URL: &str =
    "https://digital.fidelity.com/ftgw/digital/aox/BrokerageAccountOpening/JointSelectionPage";

/// Loading indicators the site uses; all must be hidden before acting.
const LOADING_SIGNS: [&str; 3] = [
    "div:nth-child(2) > .loading-spinner-mask-after",
    ".pvd-spinner__mask-inner",
    "pvd-loading-spinner",
];

/// Withdrawable-cash cell on the transfer page.
const AVAILABLE_BALANCE_CELL: &str = "tr.pvd-table__row:nth-child(2) > td:nth-child(2)";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct FidelitySession {
    page: Page,
    process: BrowserProcess,
    cfg: AppConfig,
    store: AccountStore,
    retry: RetryPolicy,
    state_path: Option<PathBuf>,
    download_dir: PathBuf,
    /// Default "From" account for transfers.
    pub source_account: Option<String>,
    /// Set by `open_account`.
    pub new_account_number: Option<String>,
}

impl FidelitySession {
    /// Launch the browser and restore saved cookies when state saving is on.
    pub async fn open(cfg: &AppConfig, source_account: Option<String>) -> Result<Self> {
        let download_dir =
            std::env::temp_dir().join(format!("fidelity-downloads-{}", uuid::Uuid::new_v4()));
        let (process, page) = browser::open(cfg, download_dir.clone())
            .await
            .context("Failed to start the browser")?;

        let mut session = Self {
            page,
            process,
            cfg: cfg.clone(),
            store: AccountStore::new(),
            retry: RetryPolicy::from(&cfg.retry),
            state_path: None,
            download_dir,
            source_account,
            new_account_number: None,
        };

        if cfg.session.save_state {
            let path = storage::prepare_state_file(
                &cfg.session.profile_path,
                cfg.session.title.as_deref(),
            )?;
            if let Some(state) = storage::load_state(&path)? {
                session
                    .page
                    .set_cookies(&state.cookies)
                    .await
                    .context("Failed to restore saved cookies")?;
                debug!(cookies = state.cookies.len(), "Restored session cookies");
            }
            session.state_path = Some(path);
        }

        info!(title = ?cfg.session.title, "Browser session ready");
        Ok(session)
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AccountStore {
        &mut self.store
    }

    /// Ticker → quantity for one account. Needs `get_account_info` first.
    pub fn get_stocks_in_account(&self, account: &str) -> Option<BTreeMap<String, f64>> {
        self.store.stocks_in_account(account)
    }

    /// Holdings across every account. Needs `get_account_info` first.
    pub fn summary_holdings(&self) -> BTreeMap<String, HoldingSummary> {
        self.store.summary_holdings()
    }

    /// Write the cookie jar to the state file (no-op unless state saving is on).
    pub async fn save_storage_state(&self) -> Result<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let cookies = self.page.cookies().await?;
        storage::save_state(&StorageState { cookies }, path)
    }

    /// Save state, close the browser and clean up downloads.
    pub async fn close(self) -> Result<()> {
        let saved = self.save_storage_state().await;
        if let Err(e) = self.page.close_browser().await {
            debug!(error = %e, "Browser.close failed; killing the process");
        }
        self.process.shutdown().await;
        let _ = std::fs::remove_dir_all(&self.download_dir);
        info!("Browser session closed");
        saved
    }

    /// Block until the operator presses Enter, leaving the browser usable.
    pub async fn pause(&self) -> Result<()> {
        println!("\nBrowser paused. Press Enter here to continue...");
        let mut line = String::new();
        tokio::io::BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers shared by the scripts
    // -----------------------------------------------------------------------

    /// Wait for every known loading indicator to be hidden. Each one gets
    /// the full `timeout`.
    pub async fn wait_for_loading_sign(&self, timeout: Duration) -> Result<()> {
        for sign in LOADING_SIGNS {
            self.page
                .wait_for(&Locator::css(sign).first(), WaitState::Hidden, timeout)
                .await?;
        }
        Ok(())
    }

    async fn wait_for_loading(&self) -> Result<()> {
        self.wait_for_loading_sign(self.cfg.timeouts.loading()).await
    }

    /// Read the withdrawable balance for the account selected in "From".
    async fn available_balance(&self) -> Result<f64> {
        let text = self
            .page
            .inner_text(&Locator::css(AVAILABLE_BALANCE_CELL))
            .await?;
        crate::store::parse_balance_cell(&text)
            .with_context(|| format!("Unexpected available balance text: {text:?}"))
    }

    /// Screenshot the page after a failed step when debugging is on.
    async fn capture_failure(&self, step: &str) {
        if !self.cfg.session.debug {
            return;
        }
        let title = self.cfg.session.title.as_deref().unwrap_or("session");
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let path = PathBuf::from(format!("fidelity_{title}_{step}_{stamp}.png"));
        match self.page.screenshot(&path).await {
            Ok(()) => info!(path = %path.display(), "Saved failure screenshot"),
            Err(e) => warn!(error = %e, "Could not capture failure screenshot"),
        }
    }
}
