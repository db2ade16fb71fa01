//! Persistence of browser storage state.
//!
//! Cookies are saved to and restored from a JSON file whose name is
//! derived from the session title, so several logins can keep separate
//! cookie jars side by side.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default state file name when no session title is given.
const DEFAULT_STATE_FILE: &str = "Fidelity.json";

/// Snapshot of the browser's cookie jar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
}

/// Path of the state file for a session title under `profile_dir`.
pub fn state_file_path(profile_dir: &Path, title: Option<&str>) -> PathBuf {
    match title {
        Some(title) => profile_dir.join(format!("Fidelity_{title}.json")),
        None => profile_dir.join(DEFAULT_STATE_FILE),
    }
}

/// Resolve the state file path and create it (holding `{}`) if absent.
pub fn prepare_state_file(profile_dir: &Path, title: Option<&str>) -> Result<PathBuf> {
    let profile_dir = std::path::absolute(profile_dir)
        .with_context(|| format!("Failed to resolve profile path {}", profile_dir.display()))?;
    let path = state_file_path(&profile_dir, title);

    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, "{}")
            .with_context(|| format!("Failed to create state file {}", path.display()))?;
        info!(path = %path.display(), "Created empty session state file");
    }

    Ok(path)
}

/// Save storage state to a JSON file.
pub fn save_state(state: &StorageState, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialise storage state")?;

    std::fs::write(path, &json)
        .with_context(|| format!("Failed to write state to {}", path.display()))?;

    debug!(path = %path.display(), cookies = state.cookies.len(), "Storage state saved");
    Ok(())
}

/// Load storage state from a JSON file.
/// Returns None if the file doesn't exist.
pub fn load_state(path: &Path) -> Result<Option<StorageState>> {
    if !path.exists() {
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state from {}", path.display()))?;

    let state: StorageState = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse state from {}", path.display()))?;

    debug!(path = %path.display(), cookies = state.cookies.len(), "Storage state loaded");
    Ok(Some(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("fidelity_state_test_{}", uuid::Uuid::new_v4()));
        p
    }

    #[test]
    fn test_state_file_path_with_title() {
        let p = state_file_path(Path::new("/profiles"), Some("alice"));
        assert_eq!(p, PathBuf::from("/profiles/Fidelity_alice.json"));
    }

    #[test]
    fn test_state_file_path_default() {
        let p = state_file_path(Path::new("/profiles"), None);
        assert_eq!(p, PathBuf::from("/profiles/Fidelity.json"));
    }

    #[test]
    fn test_prepare_creates_empty_file() {
        let dir = temp_dir().join("nested");
        let path = prepare_state_file(&dir, Some("bob")).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");

        // An empty object parses as a state with no cookies.
        let loaded = load_state(&path).unwrap().unwrap();
        assert!(loaded.cookies.is_empty());

        std::fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_prepare_keeps_existing_file() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = state_file_path(&dir, None);
        std::fs::write(&path, r#"{"cookies":[{"name":"a","value":"1"}]}"#).unwrap();

        let prepared = prepare_state_file(&dir, None).unwrap();
        let loaded = load_state(&prepared).unwrap().unwrap();
        assert_eq!(loaded.cookies.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        let state = StorageState {
            cookies: vec![serde_json::json!({ "name": "SESSION", "value": "xyz", "domain": ".fidelity.com" })],
        };
        save_state(&state, &path).unwrap();

        let loaded = load_state(&path).unwrap().unwrap();
        assert_eq!(loaded.cookies[0]["name"], "SESSION");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let loaded = load_state(Path::new("/tmp/fidelity_nonexistent_state_12345.json")).unwrap();
        assert!(loaded.is_none());
    }
}
