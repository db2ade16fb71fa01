//! Error types for the browser layer.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving the browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No usable Chrome/Chromium binary, or the process failed to start.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed { reason: String },

    /// Failed to establish a WebSocket connection to Chrome DevTools.
    #[error("failed to connect to Chrome DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },

    /// A page-state wait (element visibility, URL, download) ran out of time.
    #[error("timed out after {duration:?} waiting for {what}")]
    Timeout { what: String, duration: Duration },

    /// A protocol-level error (serialization, unexpected message format, etc.).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// No element matched the locator.
    #[error("element not found: {locator}")]
    ElementNotFound { locator: String },

    /// Navigation failed.
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// JavaScript evaluation returned an exception.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// A download was canceled or never started.
    #[error("download failed: {reason}")]
    DownloadFailed { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    /// Whether this error is one of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BrowserError::Timeout { .. } | BrowserError::CommandTimeout { .. }
        )
    }
}

/// Whether any error in an `anyhow` chain is a browser timeout.
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<BrowserError>().is_some_and(BrowserError::is_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_timeout_variants() {
        let wait = BrowserError::Timeout {
            what: "spinner".into(),
            duration: Duration::from_secs(1),
        };
        let cmd = BrowserError::CommandTimeout {
            method: "Page.navigate".into(),
            duration: Duration::from_secs(30),
        };
        assert!(wait.is_timeout());
        assert!(cmd.is_timeout());
        assert!(!BrowserError::ElementNotFound { locator: "#x".into() }.is_timeout());
    }

    #[test]
    fn test_is_timeout_through_context() {
        let res: Result<(), BrowserError> = Err(BrowserError::Timeout {
            what: "Place order".into(),
            duration: Duration::from_secs(5),
        });
        let err = res.context("trade ticket").unwrap_err();
        assert!(is_timeout(&err));

        let other = anyhow::anyhow!("plain failure");
        assert!(!is_timeout(&other));
    }
}
