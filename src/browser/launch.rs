//! Chrome process management.
//!
//! Finds a Chrome/Chromium binary, starts it with a remote-debugging port
//! and waits for the DevTools HTTP endpoint to report the browser-level
//! WebSocket URL.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::error::BrowserError;
use crate::config::BrowserConfig;

/// How long Chrome gets to bring up its DevTools endpoint.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Well-known install locations, checked before `PATH`.
fn platform_candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    }

    #[cfg(target_os = "linux")]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
        ]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        &[]
    }
}

const PATH_NAMES: [&str; 5] = [
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Locate the browser binary: the configured path, then well-known
/// locations, then `PATH`.
pub fn find_chrome(explicit: Option<&Path>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(BrowserError::LaunchFailed {
            reason: format!("configured chrome_path {} does not exist", path.display()),
        });
    }

    if let Some(found) = platform_candidate_paths()
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
    {
        return Ok(found);
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for name in PATH_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    Err(BrowserError::LaunchFailed {
        reason: "no Chrome or Chromium binary found; set browser.chrome_path".to_string(),
    })
}

/// Command-line flags for a debuggable browser.
pub fn chrome_args(cfg: &BrowserConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", cfg.debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-webgl".to_string(),
        "--disable-software-rasterizer".to_string(),
    ];
    if cfg.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(cfg.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// A running browser owned by this process.
pub struct BrowserProcess {
    child: Child,
    ws_url: String,
    temp_profile: Option<PathBuf>,
}

impl BrowserProcess {
    pub async fn launch(cfg: &BrowserConfig) -> Result<Self, BrowserError> {
        let binary = find_chrome(cfg.chrome_path.as_deref())?;

        let (profile_dir, temp_profile) = match &cfg.user_data_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let dir = std::env::temp_dir()
                    .join(format!("fidelity-automation-{}", uuid::Uuid::new_v4()));
                (dir.clone(), Some(dir))
            }
        };
        std::fs::create_dir_all(&profile_dir)?;

        tracing::info!(
            binary = %binary.display(),
            port = cfg.debug_port,
            headless = cfg.headless,
            "Launching browser"
        );

        let child = Command::new(&binary)
            .args(chrome_args(cfg, &profile_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed {
                reason: format!("{}: {e}", binary.display()),
            })?;

        let mut process = Self {
            child,
            ws_url: String::new(),
            temp_profile,
        };
        process.ws_url = wait_for_devtools(cfg.debug_port, STARTUP_TIMEOUT).await?;
        tracing::debug!(ws_url = %process.ws_url, "DevTools endpoint ready");
        Ok(process)
    }

    /// Browser-level DevTools WebSocket URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Kill the browser if it is still running and drop its temporary profile.
    pub async fn shutdown(mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill().await {
                tracing::warn!(error = %e, "Failed to kill browser process");
            }
        }
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if let Some(dir) = self.temp_profile.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Poll `/json/version` until Chrome answers.
async fn wait_for_devtools(port: u16, timeout: Duration) -> Result<String, BrowserError> {
    let url = format!("http://127.0.0.1:{port}/json/version");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| BrowserError::LaunchFailed {
            reason: format!("failed to build HTTP client: {e}"),
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(resp) = client.get(&url).send().await {
            if let Ok(info) = resp.json::<VersionInfo>().await {
                return Ok(info.web_socket_debugger_url);
            }
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                what: format!("DevTools endpoint at {url}"),
                duration: timeout,
            });
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_args_headful() {
        let cfg = BrowserConfig::default();
        let args = chrome_args(&cfg, Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--disable-webgl".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_chrome_args_headless_and_extra() {
        let cfg = BrowserConfig {
            headless: true,
            debug_port: 9333,
            extra_args: vec!["--window-size=1400,1000".to_string()],
            ..BrowserConfig::default()
        };
        let args = chrome_args(&cfg, Path::new("/p"));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--window-size=1400,1000".to_string()));
    }

    #[test]
    fn test_find_chrome_explicit_missing() {
        let err = find_chrome(Some(Path::new("/definitely/not/chrome"))).unwrap_err();
        assert!(matches!(err, BrowserError::LaunchFailed { .. }));
    }

    #[test]
    fn test_find_chrome_explicit_present() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, "").unwrap();
        assert_eq!(find_chrome(Some(&fake)).unwrap(), fake);
    }

    #[test]
    fn test_version_info_deserialize() {
        let info: VersionInfo = serde_json::from_str(
            r#"{"Browser":"Chrome/126.0","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#,
        )
        .unwrap();
        assert!(info.web_socket_debugger_url.ends_with("/browser/abc"));
    }
}
