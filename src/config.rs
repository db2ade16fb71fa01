//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `FIDELITY_CONFIG`) and
//! deserializes it into strongly-typed structs. Every field has a default,
//! so a missing file simply yields the defaults. Login secrets never live
//! in the file: they come from the `FIDELITY` environment variable.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Env var naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "FIDELITY_CONFIG";

/// Env var carrying the credential sets.
pub const CREDENTIALS_ENV: &str = "FIDELITY";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub session: SessionConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserConfig {
    /// Explicit Chrome/Chromium binary. Searched for when unset.
    pub chrome_path: Option<PathBuf>,
    pub debug_port: u16,
    pub headless: bool,
    /// Profile directory handed to Chrome. A throwaway one is used when unset.
    pub user_data_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            debug_port: 9222,
            headless: false,
            user_data_dir: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Distinguishes cookie files when several logins save state.
    pub title: Option<String>,
    pub save_state: bool,
    pub profile_path: PathBuf,
    /// Tick "Don't ask me again on this device" during 2FA.
    pub save_device: bool,
    /// Write a screenshot when a step fails.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title: None,
            save_state: false,
            profile_path: PathBuf::from("."),
            save_device: false,
            debug: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-indicator wait for loading spinners to disappear.
    pub loading_ms: u64,
    /// Spinner wait after steps known to be slow (account opening).
    pub long_loading_ms: u64,
    /// Default wait for an element before interacting with it.
    pub element_ms: u64,
    /// Page loads and URL changes.
    pub navigation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            loading_ms: 30_000,
            long_loading_ms: 60_000,
            element_ms: 5_000,
            navigation_ms: 20_000,
        }
    }
}

impl TimeoutConfig {
    pub fn loading(&self) -> Duration {
        Duration::from_millis(self.loading_ms)
    }

    pub fn long_loading(&self) -> Duration {
        Duration::from_millis(self.long_loading_ms)
    }

    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `FIDELITY_CONFIG` or `config.toml`, falling back to
    /// defaults when the file does not exist. A file that exists but
    /// fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no credential sets found in {CREDENTIALS_ENV}")]
    NoCredentials,
    #[error("credential set {index} is incomplete: expected username:password:totp_secret[:source_account]")]
    IncompleteCredentials { index: usize },
}

/// One login, parsed from `username:password:totp_secret[:source_account]`.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// `None` when the field was empty or the literal `NA`.
    pub totp_secret: Option<SecretString>,
    /// Default "From" account for transfers.
    pub source_account: Option<String>,
}

impl Credentials {
    /// Parse a single colon-separated credential set.
    pub fn parse(entry: &str, index: usize) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = entry.trim().split(':').collect();
        if fields.len() < 3 {
            return Err(ConfigError::IncompleteCredentials { index });
        }

        let totp_secret = match fields[2].trim() {
            "" | "NA" => None,
            secret => Some(SecretString::new(secret.to_string())),
        };
        let source_account = fields
            .get(3)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            username: fields[0].to_string(),
            password: SecretString::new(fields[1].to_string()),
            totp_secret,
            source_account,
        })
    }

    /// Parse the comma-separated list of credential sets. Blank entries
    /// (e.g. a trailing comma) are skipped; any short entry is an error.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ConfigError> {
        let creds = raw
            .trim()
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .enumerate()
            .map(|(i, entry)| Self::parse(entry, i))
            .collect::<Result<Vec<_>, _>>()?;
        if creds.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        Ok(creds)
    }

    /// Read and parse `FIDELITY`.
    pub fn from_env() -> Result<Vec<Self>> {
        let raw = AppConfig::resolve_env(CREDENTIALS_ENV)?;
        Ok(Self::parse_list(&raw)?)
    }

    /// Leading part of the username, enough for the operator to tell
    /// logins apart without echoing the whole thing.
    pub fn masked_username(&self) -> String {
        let len = self.username.chars().count();
        let shown = (len as f64 * 0.25).round_ties_even() as usize + 2;
        self.username.chars().take(shown).collect()
    }

    pub fn has_totp(&self) -> bool {
        self.totp_secret
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.browser.debug_port, 9222);
        assert!(!cfg.browser.headless);
        assert!(!cfg.session.save_state);
        assert_eq!(cfg.session.profile_path, PathBuf::from("."));
        assert_eq!(cfg.timeouts.loading(), Duration::from_secs(30));
        assert_eq!(cfg.timeouts.long_loading(), Duration::from_secs(60));
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [browser]
            headless = true

            [session]
            title = "alice"
            save_state = true

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.debug_port, 9222);
        assert_eq!(cfg.session.title.as_deref(), Some("alice"));
        assert!(cfg.session.save_state);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_backoff_ms, 2_000);
        assert_eq!(cfg.timeouts.element_ms, 5_000);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[timeouts]\nloading_ms = 1000\n").unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.timeouts.loading_ms, 1000);
        assert_eq!(cfg.timeouts.navigation_ms, 20_000);
    }

    #[test]
    fn test_load_config_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[browser]\ndebug_port = \"nope\"\n").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn test_parse_credentials_full() {
        let c = Credentials::parse("alice:pw:JBSWY3DPEHPK3PXP:Z12345678", 0).unwrap();
        assert_eq!(c.username, "alice");
        assert_eq!(c.password.expose_secret(), "pw");
        assert!(c.has_totp());
        assert_eq!(c.source_account.as_deref(), Some("Z12345678"));
    }

    #[test]
    fn test_parse_credentials_na_secret() {
        let c = Credentials::parse("bob:pw:NA", 0).unwrap();
        assert!(c.totp_secret.is_none());
        assert!(!c.has_totp());
        assert!(c.source_account.is_none());

        // Only the exact literal means "none".
        let c = Credentials::parse("bob:pw:na", 0).unwrap();
        assert!(c.has_totp());
    }

    #[test]
    fn test_parse_credentials_incomplete() {
        assert_eq!(
            Credentials::parse("carol:pw", 2).unwrap_err(),
            ConfigError::IncompleteCredentials { index: 2 }
        );
    }

    #[test]
    fn test_parse_list() {
        let creds = Credentials::parse_list(" a:b:NA , c:d:SECRET:123456789,").unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].username, "a");
        assert_eq!(creds[1].source_account.as_deref(), Some("123456789"));

        assert!(Credentials::parse_list("a:b:NA,oops").is_err());
        assert_eq!(Credentials::parse_list("  ").unwrap_err(), ConfigError::NoCredentials);
    }

    #[test]
    fn test_masked_username() {
        let c = Credentials::parse("johnsmith:pw:NA", 0).unwrap();
        // round(9 * 0.25) = 2, plus 2.
        assert_eq!(c.masked_username(), "john");

        let c = Credentials::parse("ab:pw:NA", 0).unwrap();
        // round(0.5) rounds to even (0), plus 2 shows everything.
        assert_eq!(c.masked_username(), "ab");

        let c = Credentials::parse("abcdef:pw:NA", 0).unwrap();
        // round(1.5) = 2, plus 2.
        assert_eq!(c.masked_username(), "abcd");
    }
}
