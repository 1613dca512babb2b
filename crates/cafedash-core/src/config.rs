//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API base URL, timeouts, the expiry skew buffer, the optional
//! background refresh interval and where tokens are persisted.
//!
//! Configuration is stored at `~/.config/cafedash/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::auth::claims::DEFAULT_SKEW_SECS;
use crate::auth::{FileTokenStore, KeyringTokenStore, LifecycleSettings, MemoryTokenStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "cafedash";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const BASE_URL_ENV: &str = "CAFEDASH_API_BASE_URL";

/// Local development backend
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    File,
    Keyring,
    Memory,
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_skew() -> u32 {
    DEFAULT_SKEW_SECS as u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_skew")]
    pub expiry_skew_secs: u32,
    #[serde(default)]
    pub background_refresh_secs: Option<u64>,
    #[serde(default)]
    pub token_store: TokenStoreKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            expiry_skew_secs: default_skew(),
            background_refresh_secs: None,
            token_store: TokenStoreKind::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Environment variable first, then the config file, then the local
    /// development default.
    pub fn base_url(&self) -> String {
        Self::resolve_base_url(std::env::var(BASE_URL_ENV).ok(), self.api_base_url.as_deref())
    }

    fn resolve_base_url(env: Option<String>, configured: Option<&str>) -> String {
        env.filter(|v| !v.trim().is_empty())
            .or_else(|| configured.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn background_refresh_interval(&self) -> Option<Duration> {
        self.background_refresh_secs.map(Duration::from_secs)
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            skew_secs: i64::from(self.expiry_skew_secs),
            refresh_timeout: self.request_timeout(),
        }
    }

    /// Build the configured token store backend.
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.token_store {
            TokenStoreKind::File => Arc::new(FileTokenStore::in_dir(&self.cache_dir()?)),
            TokenStoreKind::Keyring => Arc::new(KeyringTokenStore::new()),
            TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.expiry_skew_secs, 60);
        assert!(config.background_refresh_interval().is_none());
        assert_eq!(config.token_store, TokenStoreKind::File);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url":"https://cafe.example.com","token_store":"keyring"}"#)
                .unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://cafe.example.com"));
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.token_store, TokenStoreKind::Keyring);
    }

    #[test]
    fn test_base_url_resolution_order() {
        assert_eq!(Config::resolve_base_url(None, None), DEFAULT_BASE_URL);
        assert_eq!(
            Config::resolve_base_url(None, Some("https://cafe.example.com")),
            "https://cafe.example.com"
        );
        assert_eq!(
            Config::resolve_base_url(Some("http://10.0.0.5:8000".into()), Some("https://cafe.example.com")),
            "http://10.0.0.5:8000"
        );
        assert_eq!(Config::resolve_base_url(Some("  ".into()), None), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_out_of_range_skew_is_rejected_at_load() {
        let huge = serde_json::from_str::<Config>(r#"{"expiry_skew_secs":92233720368547758}"#);
        assert!(huge.is_err());
        let negative = serde_json::from_str::<Config>(r#"{"expiry_skew_secs":-5}"#);
        assert!(negative.is_err());

        let max: Config =
            serde_json::from_str(&format!(r#"{{"expiry_skew_secs":{}}}"#, u32::MAX)).unwrap();
        assert_eq!(max.lifecycle_settings().skew_secs, i64::from(u32::MAX));
    }

    #[test]
    fn test_lifecycle_settings_follow_config() {
        let config = Config {
            request_timeout_secs: 3,
            expiry_skew_secs: 15,
            ..Default::default()
        };
        let settings = config.lifecycle_settings();
        assert_eq!(settings.skew_secs, 15);
        assert_eq!(settings.refresh_timeout, Duration::from_secs(3));
    }
}
