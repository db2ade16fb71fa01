//! Equity order entry.
//!
//! Orders go through the dedicated trade ticket. Stocks under $1 (and every
//! order during extended hours) are placed as limit orders a tick through
//! the last price; everything else is a market order.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::{FidelitySession, ORDER_ENTRY_URL};
use crate::browser::{BrowserError, Locator, WaitState};
use crate::types::TradeSide;

const QUOTE_TIMEOUT: Duration = Duration::from_secs(5);
const PLACE_ORDER_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BANNER_TIMEOUT: Duration = Duration::from_secs(2);
const ORDER_RECEIVED_TIMEOUT: Duration = Duration::from_secs(10);

const EXTENDED_HOURS_OFF: &str = "Extended hours trading: OffUntil 8:00 PM ET";
const UNKNOWN_ERROR: &str = "Could not retrieve error message from popup";

/// One order to place (or preview, when `dry_run`).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub ticker: String,
    pub quantity: f64,
    pub side: TradeSide,
    pub account: String,
    pub dry_run: bool,
}

#[derive(Debug, Error)]
pub enum TradeError {
    /// The site refused the order; the message is the cleaned error banner.
    #[error("{message}")]
    Rejected { message: String },
    #[error("Order preview is not what is expected")]
    PreviewMismatch,
    #[error("Timed out waiting for 'Order received': {0}")]
    NotReceived(String),
    #[error("Driver timed out. Order not complete: {0}")]
    Timeout(String),
    #[error("Some error occurred: {0}")]
    Other(String),
}

impl From<BrowserError> for TradeError {
    fn from(e: BrowserError) -> Self {
        if e.is_timeout() {
            TradeError::Timeout(e.to_string())
        } else {
            TradeError::Other(e.to_string())
        }
    }
}

impl From<anyhow::Error> for TradeError {
    fn from(e: anyhow::Error) -> Self {
        if crate::browser::is_timeout(&e) {
            TradeError::Timeout(format!("{e:#}"))
        } else {
            TradeError::Other(format!("{e:#}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Pricing and formatting
// ---------------------------------------------------------------------------

/// Whether the ticket should use a limit order.
pub fn needs_limit_order(last_price: f64, extended_hours: bool) -> bool {
    last_price < 1.0 || extended_hours
}

/// Limit price one tick through the last price: above it when buying,
/// below it when selling. The tick is a cent, or 0.0001 at or under $0.10.
/// Extended hours only accept two decimals.
pub fn limit_price(last_price: f64, side: TradeSide, extended_hours: bool) -> f64 {
    let tick = if last_price > 0.1 { 0.01 } else { 0.0001 };
    let raw = match side {
        TradeSide::Buy => last_price + tick,
        TradeSide::Sell => last_price - tick,
    };
    let precision = if extended_hours { 2 } else { 3 };
    let scale = 10f64.powi(precision);
    (raw * scale).round() / scale
}

/// Shortest decimal form of a price (`0.51`, not `0.510`).
pub fn format_price(price: f64) -> String {
    let text = format!("{price:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    text.to_string()
}

/// Quantity as typed into the ticket and shown on the preview.
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{}", quantity as i64)
    } else {
        quantity.to_string()
    }
}

/// Tidy an error banner's text: drop newlines and tabs, squeeze repeated
/// spaces and remove the "critical" icon label.
pub fn clean_error_banner(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev = None;
    for c in raw.chars() {
        let skip = c == '\n' || c == '\t' || (c == ' ' && prev == Some(' '));
        prev = Some(c);
        if !skip {
            out.push(c);
        }
    }
    out.replace("critical", "").trim().to_string()
}

fn parse_last_price(text: &str) -> Option<f64> {
    text.trim().replace(['$', ','], "").parse().ok()
}

// ---------------------------------------------------------------------------
// Order script
// ---------------------------------------------------------------------------

impl FidelitySession {
    /// Place (or, for a dry run, preview) one order.
    ///
    /// After changing tickers between calls, reload the page first; the
    /// ticket keeps state from the previous order.
    pub async fn transaction(&mut self, order: &OrderRequest) -> Result<(), TradeError> {
        let result = self.try_transaction(order).await;
        match &result {
            Ok(()) => info!(
                ticker = %order.ticker,
                side = %order.side,
                quantity = order.quantity,
                account = %order.account,
                dry_run = order.dry_run,
                "Order complete"
            ),
            Err(e) => {
                warn!(ticker = %order.ticker, account = %order.account, error = %e, "Order failed");
                self.capture_failure("transaction").await;
            }
        }
        result
    }

    async fn try_transaction(&mut self, order: &OrderRequest) -> Result<(), TradeError> {
        let account = order.account.to_uppercase();
        let ticker = order.ticker.to_uppercase();

        self.page.wait_for_load_state(self.cfg.timeouts.loading()).await?;
        if self.page.url().await? != ORDER_ENTRY_URL {
            self.page.goto(ORDER_ENTRY_URL).await?;
        }

        let account_dropdown = Locator::css("#dest-acct-dropdown");
        let account_option = Locator::role("option").has_text(&account);
        self.page.click(&account_dropdown).await?;
        if !self.page.is_visible(&account_option).await? {
            // The dropdown occasionally renders empty.
            info!("Account dropdown empty, reloading");
            self.page.reload().await?;
            self.page.click(&account_dropdown).await?;
        }
        self.page.click(&account_option).await?;

        let symbol = Locator::label("Symbol");
        self.page.click(&symbol).await?;
        self.page.fill(&symbol, &order.ticker).await?;
        self.page.press_enter(&symbol).await?;

        self.page
            .wait_for(&Locator::css("#quote-panel"), WaitState::Visible, QUOTE_TIMEOUT)
            .await?;
        let last_text = self
            .page
            .text_content(&Locator::css("#eq-ticket__last-price > span.last-price"))
            .await?;
        let last_price = parse_last_price(&last_text)
            .ok_or_else(|| TradeError::Other(format!("Unexpected last price {last_text:?}")))?;

        let expand = Locator::role_named("button", "View expanded ticket");
        if self.page.is_visible(&expand).await? {
            self.page.click(&expand).await?;
            self.page
                .wait_for(
                    &Locator::role_named("button", "Calculate shares"),
                    WaitState::Visible,
                    QUOTE_TIMEOUT,
                )
                .await?;
        }

        let extended = self
            .page
            .is_visible(&Locator::text("Extended hours trading"))
            .await?;
        if extended {
            let toggle = Locator::text(EXTENDED_HOURS_OFF);
            if self.page.is_visible(&toggle).await? {
                self.page.check(&toggle).await?;
            }
        }

        let side_option = Locator::role_exact("option", order.side.ticket_label());
        self.page.click(&Locator::css(".eq-ticket-action-label")).await?;
        self.page
            .wait_for(&side_option, WaitState::Visible, self.cfg.timeouts.element())
            .await?;
        self.page.click(&side_option).await?;

        let quantity = format_quantity(order.quantity);
        self.page
            .click(&Locator::css("#eqt-mts-stock-quatity div").has_text("Quantity"))
            .await?;
        self.page
            .fill(&Locator::text_exact("Quantity"), &quantity)
            .await?;

        if needs_limit_order(last_price, extended) {
            let price = limit_price(last_price, order.side, extended);
            self.page
                .click(&Locator::css("#dest-dropdownlist-button-ordertype > span:nth-child(1)"))
                .await?;
            self.page
                .click(&Locator::role_exact("option", "Limit"))
                .await?;
            self.page.click(&Locator::text_exact("Limit price")).await?;
            self.page
                .fill(&Locator::label("Limit price"), &format_price(price))
                .await?;
            info!(ticker = %ticker, last_price, limit = price, "Using limit order");
        } else {
            self.page.click(&Locator::css("#order-type-container-id")).await?;
            self.page
                .click(&Locator::role_exact("option", "Market"))
                .await?;
        }

        self.page
            .click(&Locator::role_named("button", "Preview order"))
            .await?;
        self.wait_for_loading().await?;

        let place_order = Locator::role_named("button", "Place order");
        if let Err(e) = self
            .page
            .wait_for(&place_order, WaitState::Visible, PLACE_ORDER_TIMEOUT)
            .await
        {
            if !e.is_timeout() {
                return Err(e.into());
            }
            let message = self.read_error_banner().await;
            return Err(TradeError::Rejected { message });
        }

        let preview_ok = self
            .page
            .is_visible(&Locator::css("preview").has_text(&account))
            .await?
            && self
                .page
                .is_visible(&Locator::text_exact(&format!("Symbol{ticker}")))
                .await?
            && self
                .page
                .is_visible(&Locator::text(&format!("Action{}", order.side.ticket_label())))
                .await?
            && self
                .page
                .is_visible(&Locator::text(&format!("Quantity{quantity}")))
                .await?;
        if !preview_ok {
            return Err(TradeError::PreviewMismatch);
        }

        if order.dry_run {
            return Ok(());
        }

        self.page.click(&place_order.first()).await?;
        let received = async {
            self.wait_for_loading().await?;
            self.page
                .wait_for(
                    &Locator::text_exact("Order received"),
                    WaitState::Visible,
                    ORDER_RECEIVED_TIMEOUT,
                )
                .await?;
            anyhow::Ok(())
        };
        received
            .await
            .map_err(|e| TradeError::NotReceived(format!("{e:#}")))
    }

    /// Read and dismiss the error popup after a failed preview. Reloads the
    /// page when the popup cannot be closed.
    async fn read_error_banner(&mut self) -> String {
        let dialog = Locator::label("Error").locate(Locator::css("div").has_text("critical").nth(2));
        let inline = Locator::css(r#".pvd-inline-alert__content font[color="red"]"#);
        let close = Locator::role_named("button", "Close dialog");

        let mut closed = false;
        let mut message = String::new();
        for banner in [dialog, inline] {
            let Ok(text) = self
                .page
                .text_content_within(&banner, ERROR_BANNER_TIMEOUT)
                .await
            else {
                continue;
            };
            message = text;
            closed = self.page.click(&close).await.is_ok();
            if !message.is_empty() {
                break;
            }
        }

        if !closed {
            if let Err(e) = self.page.reload().await {
                warn!(error = %e, "Reload after order error failed");
            }
        }

        if message.is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            clean_error_banner(&message)
        }
    }
}
