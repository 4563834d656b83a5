use crate::error::ConfigError;
use crate::sync::SyncOptions;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration. Every field has an explicit default; the
/// struct is resolved once at startup and passed down, never re-read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the local store. `~` is expanded.
    pub data_dir: String,
    /// Autosave debounce in milliseconds.
    pub autosave_debounce_ms: u64,
    pub cloud: CloudConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL of the blob store API.
    pub api_base: String,
    /// OAuth token endpoint.
    pub token_url: String,
    /// Public client id for the token exchange.
    pub app_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub snapshot_path: String,
    pub lock_path: String,
    /// Timestamp comparison tolerance in milliseconds.
    pub tolerance_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            autosave_debounce_ms: 1000,
            cloud: CloudConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base: "https://blob.example.com/api/".to_string(),
            token_url: "https://blob.example.com/oauth2/token".to_string(),
            app_key: String::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "/driftvault/backup.json".to_string(),
            lock_path: "/driftvault/sync.lock".to_string(),
            tolerance_ms: 1000,
        }
    }
}

fn default_data_dir() -> String {
    ProjectDirs::from("com", "driftvault", "driftvault")
        .map(|dirs| dirs.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "~/.driftvault".to_string())
}

impl Config {
    /// Load from the default config path; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        let Some(dirs) = ProjectDirs::from("com", "driftvault", "driftvault") else {
            return Ok(Self::default());
        };
        let path = dirs.config_dir().join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| ConfigError::Load(format!("{}: {error}", path.display())))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|error| ConfigError::Load(format!("{}: {error}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sync.snapshot_path == self.sync.lock_path {
            anyhow::bail!(ConfigError::Validation(
                "sync.snapshot_path and sync.lock_path must differ".to_string()
            ));
        }
        Ok(())
    }

    /// Path of the SQLite store file, with `~` expanded.
    pub fn store_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.data_dir);
        PathBuf::from(expanded.into_owned()).join("vault.db")
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            snapshot_path: self.sync.snapshot_path.clone(),
            lock_path: self.sync.lock_path.clone(),
            tolerance: Duration::from_millis(self.sync.tolerance_ms),
        }
    }

    pub fn token_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.cloud.token_url).context("cloud.token_url is not a valid URL")
    }

    pub fn api_base(&self) -> Result<url::Url> {
        url::Url::parse(&self.cloud.api_base).context("cloud.api_base is not a valid URL")
    }
}
