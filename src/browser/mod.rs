//! Chromium automation over the Chrome DevTools Protocol.
//!
//! `launch` starts the browser, `cdp` speaks the wire protocol, `locator`
//! describes elements the way the scripts think about them (by label,
//! role, text) and `page` turns all of that into navigation, waits and
//! element actions.

pub mod cdp;
pub mod error;
pub mod launch;
pub mod locator;
pub mod page;

use std::path::PathBuf;

pub use error::{is_timeout, BrowserError};
pub use launch::BrowserProcess;
pub use locator::Locator;
pub use page::{Download, Page, SelectOption, WaitState};

use crate::config::AppConfig;

/// Launch a browser and attach to its first tab.
///
/// Downloads land in `download_dir` until a script moves them.
pub async fn open(cfg: &AppConfig, download_dir: PathBuf) -> Result<(BrowserProcess, Page), BrowserError> {
    let process = BrowserProcess::launch(&cfg.browser).await?;
    let client = cdp::CdpClient::connect(process.ws_url()).await?;
    let page = Page::attach(
        client,
        download_dir,
        cfg.timeouts.navigation(),
        cfg.timeouts.element(),
    )
    .await?;
    Ok((process, page))
}
