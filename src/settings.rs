use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SipError};
use crate::remote::SessionProvider;

pub const TOKEN_ENV: &str = "SIPDESK_TOKEN";
pub const CONFIG_DIR_ENV: &str = "SIPDESK_CONFIG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default = "default_data_dir_string")]
    pub data_dir: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_data_dir_string() -> String {
    default_data_dir().to_string_lossy().to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            data_dir: default_data_dir_string(),
            timeout_secs: default_timeout_secs(),
            branch_id: None,
            token_file: None,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("sipdesk")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("sipdesk")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable settings: {e}");
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| SipError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn get_data_dir() -> PathBuf {
    PathBuf::from(&load_settings().data_dir)
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

/// Credential source backed by the environment and the configured token
/// file. Read on every request, so a token refreshed by the login tool is
/// picked up without restarting.
pub struct SettingsSession {
    token_file: Option<PathBuf>,
    branch_id: Option<String>,
}

impl SettingsSession {
    pub fn new(settings: &Settings) -> Self {
        Self {
            token_file: settings.token_file.as_deref().map(PathBuf::from),
            branch_id: settings.branch_id.clone(),
        }
    }
}

impl SessionProvider for SettingsSession {
    fn current_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
        let path = self.token_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read token file: {e}");
                None
            }
        }
    }

    fn current_branch(&self) -> Option<String> {
        self.branch_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only test that sets CONFIG_DIR_ENV.
    #[test]
    fn test_save_and_load_through_config_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(CONFIG_DIR_ENV, dir.path());
        assert_eq!(settings_path(), dir.path().join("settings.json"));

        let settings = Settings {
            api_base_url: "https://api.example.in/v1".to_string(),
            data_dir: "/tmp/test".to_string(),
            timeout_secs: 10,
            branch_id: Some("7".to_string()),
            token_file: None,
        };
        save_settings(&settings).unwrap();
        let loaded = load_settings();
        assert_eq!(loaded.api_base_url, "https://api.example.in/v1");
        assert_eq!(loaded.data_dir, "/tmp/test");
        assert_eq!(loaded.timeout_secs, 10);
        assert_eq!(loaded.branch_id.as_deref(), Some("7"));
        assert_eq!(get_data_dir(), PathBuf::from("/tmp/test"));

        std::fs::write(settings_path(), "{not json").unwrap();
        let fallback = load_settings();
        assert!(fallback.api_base_url.is_empty());
        assert_eq!(fallback.timeout_secs, 30);

        std::env::remove_var(CONFIG_DIR_ENV);
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"api_base_url": "https://api.example.in"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.timeout_secs, 30);
        assert!(!s.data_dir.is_empty());
        assert!(s.token_file.is_none());
    }

    #[test]
    fn test_timeout_is_never_zero() {
        let s = Settings {
            timeout_secs: 0,
            ..Settings::default()
        };
        assert_eq!(s.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  abc.def.ghi\n").unwrap();
        let session = SettingsSession {
            token_file: Some(path),
            branch_id: Some("3".into()),
        };
        // The env var wins when set; only assert the file path when it isn't.
        if std::env::var(TOKEN_ENV).is_err() {
            assert_eq!(session.current_token().as_deref(), Some("abc.def.ghi"));
        }
        assert_eq!(session.current_branch().as_deref(), Some("3"));
    }
}
