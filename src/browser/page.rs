//! High-level page driver.
//!
//! Wraps one attached page session and offers the handful of operations
//! the brokerage scripts need: navigation, locator-based interaction,
//! visibility waits, downloads and cookie access. Waits are implemented by
//! polling the live DOM; a timeout is the only way a wait ends early.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use super::cdp::{CdpClient, CdpEvent};
use super::error::BrowserError;
use super::locator::{build_locator_expression, Locator};

/// How often DOM conditions are re-checked while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout for individual CDP commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Element state a wait can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// At least the first match is rendered with a non-empty box.
    Visible,
    /// No match is visible (an absent element counts as hidden).
    Hidden,
    /// At least one match exists in the DOM.
    Attached,
}

impl std::fmt::Display for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitState::Visible => write!(f, "visible"),
            WaitState::Hidden => write!(f, "hidden"),
            WaitState::Attached => write!(f, "attached"),
        }
    }
}

/// One `<option>` of a `<select>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

/// A finished download sitting in the session's download directory.
#[derive(Debug, Clone)]
pub struct Download {
    pub suggested_filename: String,
    path: PathBuf,
}

impl Download {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the downloaded file to `dest`.
    pub fn save_as(&self, dest: &Path) -> Result<(), BrowserError> {
        if std::fs::rename(&self.path, dest).is_err() {
            // Different filesystem: fall back to copy + delete.
            std::fs::copy(&self.path, dest)?;
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    kind: String,
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// A single browser tab driven over CDP.
pub struct Page {
    client: CdpClient,
    session_id: String,
    target_id: String,
    download_dir: PathBuf,
    navigation_timeout: Duration,
    action_timeout: Duration,
}

impl Page {
    /// Attach to the browser's first page (creating one if needed), enable
    /// the domains the scripts rely on and route downloads to `download_dir`.
    pub async fn attach(
        client: CdpClient,
        download_dir: PathBuf,
        navigation_timeout: Duration,
        action_timeout: Duration,
    ) -> Result<Self, BrowserError> {
        let targets = client
            .call(None, "Target.getTargets", serde_json::json!({}), COMMAND_TIMEOUT)
            .await?;
        let existing = parse_targets(&targets)
            .into_iter()
            .find(|t| t.kind == "page")
            .map(|t| t.target_id);

        let target_id = match existing {
            Some(id) => id,
            None => {
                let created = client
                    .call(
                        None,
                        "Target.createTarget",
                        serde_json::json!({ "url": "about:blank" }),
                        COMMAND_TIMEOUT,
                    )
                    .await?;
                json_str(&created, "targetId")?
            }
        };

        let attached = client
            .call(
                None,
                "Target.attachToTarget",
                serde_json::json!({ "targetId": target_id, "flatten": true }),
                COMMAND_TIMEOUT,
            )
            .await?;
        let session_id = json_str(&attached, "sessionId")?;

        std::fs::create_dir_all(&download_dir)?;
        client
            .call(
                None,
                "Browser.setDownloadBehavior",
                serde_json::json!({
                    "behavior": "allow",
                    "downloadPath": download_dir.to_string_lossy(),
                    "eventsEnabled": true,
                }),
                COMMAND_TIMEOUT,
            )
            .await?;

        let page = Self {
            client,
            session_id,
            target_id,
            download_dir,
            navigation_timeout,
            action_timeout,
        };
        for domain in ["Page", "Runtime", "Network"] {
            page.send(&format!("{domain}.enable"), serde_json::json!({})).await?;
        }

        tracing::debug!(target = %page.target_id, "attached to page target");
        Ok(page)
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.client
            .call(Some(&self.session_id), method, params, COMMAND_TIMEOUT)
            .await
    }

    /// Wait for the next event matching `pred`, discarding the rest.
    async fn wait_for_event<F>(
        &mut self,
        what: &str,
        timeout: Duration,
        pred: F,
    ) -> Result<CdpEvent, BrowserError>
    where
        F: Fn(&CdpEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timed_out = || BrowserError::Timeout {
                what: what.to_string(),
                duration: timeout,
            };
            if remaining.is_zero() {
                return Err(timed_out());
            }
            match tokio::time::timeout(remaining, self.client.recv_event()).await {
                Ok(Some(event)) if pred(&event) => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(BrowserError::Protocol {
                        detail: format!("WebSocket closed while waiting for {what}"),
                    })
                }
                Err(_) => return Err(timed_out()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Navigate and wait for the load event.
    pub async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        tracing::debug!(url, "navigating");
        self.client.drain_events();

        let result = self
            .send("Page.navigate", serde_json::json!({ "url": url }))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(BrowserError::NavigationFailed {
                reason: format!("{url}: {error_text}"),
            });
        }

        let session = self.session_id.clone();
        let timeout = self.navigation_timeout;
        self.wait_for_event(&format!("load of {url}"), timeout, move |e| {
            is_load_event(e, &session)
        })
        .await
        .map(|_| ())
    }

    pub async fn reload(&mut self) -> Result<(), BrowserError> {
        self.client.drain_events();
        self.send("Page.reload", serde_json::json!({})).await?;
        let session = self.session_id.clone();
        let timeout = self.navigation_timeout;
        self.wait_for_event("page reload", timeout, move |e| {
            is_load_event(e, &session)
        })
        .await
        .map(|_| ())
    }

    /// Wait until `document.readyState` is `complete`.
    pub async fn wait_for_load_state(&self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.evaluate("document.readyState").await {
                Ok(Value::String(s)) if s == "complete" => return Ok(()),
                Ok(_) | Err(BrowserError::CdpError { .. }) | Err(BrowserError::JsException { .. }) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: "document load".to_string(),
                    duration: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn url(&self) -> Result<String, BrowserError> {
        let value = self.evaluate("window.location.href").await?;
        value.as_str().map(str::to_string).ok_or_else(|| BrowserError::Protocol {
            detail: "location.href evaluation did not return a string".to_string(),
        })
    }

    /// Wait until the current URL contains `fragment`.
    pub async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(url) = self.url().await {
                if url.contains(fragment) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("URL containing {fragment}"),
                    duration: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for_timeout(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    // -----------------------------------------------------------------------
    // JavaScript evaluation
    // -----------------------------------------------------------------------

    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .send(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| exception.get("text").and_then(|t| t.as_str()))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(BrowserError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn run(&self, locator: &Locator, op: &str, arg: Value) -> Result<Value, BrowserError> {
        let expression = build_locator_expression(locator, op, &arg);
        let reply = self.evaluate(&expression).await?;
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(reply.get("value").cloned().unwrap_or(Value::Null));
        }
        match reply.get("error").and_then(Value::as_str) {
            Some("not_found") => Err(BrowserError::ElementNotFound {
                locator: locator.to_string(),
            }),
            Some(other) => Err(BrowserError::Protocol {
                detail: format!("{op} on {locator} failed: {other}"),
            }),
            None => Err(BrowserError::Protocol {
                detail: format!("{op} on {locator} returned an unexpected reply"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Queries and waits
    // -----------------------------------------------------------------------

    pub async fn count(&self, locator: &Locator) -> Result<usize, BrowserError> {
        let value = self.run(locator, "count", Value::Null).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    /// Immediate visibility check of the first match; never waits.
    pub async fn is_visible(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let value = self.run(locator, "visible", Value::Null).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn wait_for(
        &self,
        locator: &Locator,
        state: WaitState,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let reached = match state {
                WaitState::Visible => self.run(locator, "visible", Value::Null).await,
                WaitState::Hidden => self.run(locator, "hidden", Value::Null).await,
                WaitState::Attached => self
                    .run(locator, "count", Value::Null)
                    .await
                    .map(|v| Value::Bool(v.as_u64().unwrap_or(0) > 0)),
            };
            match reached {
                Ok(Value::Bool(true)) => return Ok(()),
                // Evaluations fail while a navigation swaps documents.
                Ok(_) | Err(BrowserError::CdpError { .. }) | Err(BrowserError::JsException { .. }) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("{locator} to be {state}"),
                    duration: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    // -----------------------------------------------------------------------
    // Actions (each waits for the element to be visible first)
    // -----------------------------------------------------------------------

    pub async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.click_within(locator, self.action_timeout).await
    }

    pub async fn click_within(&self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError> {
        self.wait_for(locator, WaitState::Visible, timeout).await?;
        self.run(locator, "click", Value::Null).await.map(|_| ())
    }

    pub async fn fill(&self, locator: &Locator, value: &str) -> Result<(), BrowserError> {
        self.wait_for(locator, WaitState::Visible, self.action_timeout).await?;
        self.run(locator, "fill", Value::String(value.to_string()))
            .await
            .map(|_| ())
    }

    /// Check a checkbox (or its label). Returns the resulting checked state.
    pub async fn check(&self, locator: &Locator) -> Result<bool, BrowserError> {
        self.wait_for(locator, WaitState::Visible, self.action_timeout).await?;
        let value = self.run(locator, "check", Value::Null).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn is_checked(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let value = self.run(locator, "checked", Value::Null).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn inner_text(&self, locator: &Locator) -> Result<String, BrowserError> {
        self.wait_for(locator, WaitState::Attached, self.action_timeout).await?;
        let value = self.run(locator, "inner_text", Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn text_content(&self, locator: &Locator) -> Result<String, BrowserError> {
        self.text_content_within(locator, self.action_timeout).await
    }

    pub async fn text_content_within(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<String, BrowserError> {
        self.wait_for(locator, WaitState::Attached, timeout).await?;
        let value = self.run(locator, "text_content", Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn get_attribute(
        &self,
        locator: &Locator,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let value = self
            .run(locator, "attribute", Value::String(name.to_string()))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// All options of the `<select>` matched by `locator`.
    pub async fn options(&self, locator: &Locator) -> Result<Vec<SelectOption>, BrowserError> {
        self.wait_for(locator, WaitState::Attached, self.action_timeout).await?;
        let value = self.run(locator, "options", Value::Null).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Protocol {
            detail: format!("unexpected option list for {locator}: {e}"),
        })
    }

    /// Select an option by value or by visible text.
    pub async fn select_option(&self, locator: &Locator, value: &str) -> Result<(), BrowserError> {
        self.wait_for(locator, WaitState::Visible, self.action_timeout).await?;
        self.run(locator, "select", Value::String(value.to_string()))
            .await
            .map(|_| ())
    }

    /// Focus the element and send a real Enter keystroke.
    pub async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.run(locator, "focus", Value::Null).await?;
        for kind in ["keyDown", "keyUp"] {
            self.send(
                "Input.dispatchKeyEvent",
                serde_json::json!({
                    "type": kind,
                    "key": "Enter",
                    "code": "Enter",
                    "windowsVirtualKeyCode": 13,
                    "text": "\r",
                }),
            )
            .await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Downloads
    // -----------------------------------------------------------------------

    /// Forget stale events; call right before the click that starts a download.
    pub fn begin_download(&mut self) {
        self.client.drain_events();
    }

    /// Wait for a download started after `begin_download` to complete.
    pub async fn wait_for_download(&mut self, timeout: Duration) -> Result<Download, BrowserError> {
        let started = self
            .wait_for_event("download to start", timeout, |e| {
                e.method == "Browser.downloadWillBegin"
            })
            .await?;
        let guid = json_str(&started.params, "guid")?;
        let suggested_filename = json_str(&started.params, "suggestedFilename")?;

        let progress = self
            .wait_for_event("download to finish", timeout, |e| {
                e.method == "Browser.downloadProgress"
                    && e.params.get("guid").and_then(Value::as_str) == Some(guid.as_str())
                    && matches!(
                        e.params.get("state").and_then(Value::as_str),
                        Some("completed") | Some("canceled")
                    )
            })
            .await?;

        if progress.params.get("state").and_then(Value::as_str) != Some("completed") {
            return Err(BrowserError::DownloadFailed {
                reason: format!("{suggested_filename} was canceled"),
            });
        }

        let path = self.download_dir.join(&suggested_filename);
        tracing::debug!(file = %path.display(), "download complete");
        Ok(Download {
            suggested_filename,
            path,
        })
    }

    /// Close every page target except this one (popups).
    pub async fn close_other_pages(&self) -> Result<usize, BrowserError> {
        let targets = self
            .client
            .call(None, "Target.getTargets", serde_json::json!({}), COMMAND_TIMEOUT)
            .await?;
        let mut closed = 0;
        for target in parse_targets(&targets) {
            if target.kind == "page" && target.target_id != self.target_id {
                self.client
                    .call(
                        None,
                        "Target.closeTarget",
                        serde_json::json!({ "targetId": target.target_id }),
                        COMMAND_TIMEOUT,
                    )
                    .await?;
                closed += 1;
            }
        }
        Ok(closed)
    }

    // -----------------------------------------------------------------------
    // Cookies, screenshots, shutdown
    // -----------------------------------------------------------------------

    pub async fn cookies(&self) -> Result<Vec<Value>, BrowserError> {
        let result = self.send("Network.getAllCookies", serde_json::json!({})).await?;
        Ok(result
            .get("cookies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn set_cookies(&self, cookies: &[Value]) -> Result<(), BrowserError> {
        let params: Vec<Value> = cookies.iter().filter_map(cookie_param).collect();
        if params.is_empty() {
            return Ok(());
        }
        self.send("Network.setCookies", serde_json::json!({ "cookies": params }))
            .await
            .map(|_| ())
    }

    pub async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let result = self
            .send("Page.captureScreenshot", serde_json::json!({ "format": "png" }))
            .await?;
        let data = json_str(&result, "data")?;
        let bytes = B64.decode(data).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to decode screenshot base64: {e}"),
        })?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Ask the browser to exit.
    pub async fn close_browser(&self) -> Result<(), BrowserError> {
        self.client
            .call(None, "Browser.close", serde_json::json!({}), COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

fn is_load_event(event: &CdpEvent, session_id: &str) -> bool {
    event.method == "Page.loadEventFired" && event.session_id.as_deref() == Some(session_id)
}

fn json_str(value: &Value, key: &str) -> Result<String, BrowserError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol {
            detail: format!("missing '{key}' in CDP payload"),
        })
}

fn parse_targets(result: &Value) -> Vec<TargetInfo> {
    result
        .get("targetInfos")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Convert a cookie from `Network.getAllCookies` into a `CookieParam`
/// accepted by `Network.setCookies`. Cookies without name or domain are
/// dropped; session cookies lose their `expires`.
pub fn cookie_param(cookie: &Value) -> Option<Value> {
    const KEPT: [&str; 8] = [
        "name", "value", "domain", "path", "secure", "httpOnly", "sameSite", "priority",
    ];
    let obj = cookie.as_object()?;
    obj.get("name")?.as_str()?;
    obj.get("domain")?.as_str()?;

    let mut out = serde_json::Map::new();
    for key in KEPT {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    let is_session = obj.get("session").and_then(Value::as_bool).unwrap_or(false);
    if let Some(expires) = obj.get("expires").and_then(Value::as_f64) {
        if !is_session && expires > 0.0 {
            out.insert("expires".to_string(), Value::from(expires));
        }
    }
    Some(Value::Object(out))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
