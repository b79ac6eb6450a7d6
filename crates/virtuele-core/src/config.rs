//! Application configuration management.
//!
//! Configuration is stored at `~/.config/virtuele/config.json` and covers the
//! API location, request timeout, bearer scheme and where tokens are kept.
//! A few settings can be overridden from the environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::CatalogClient;
use crate::auth::{
    AuthScheme, FileTokenStore, KeyringTokenStore, MemoryTokenStore, SessionClient, TokenStore,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "virtuele";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";

const DEFAULT_TIMEOUT_SECS: u64 = crate::auth::session::DEFAULT_TIMEOUT_SECS;

pub const ENV_BASE_URL: &str = "VIRTUELE_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "VIRTUELE_TIMEOUT_SECS";
pub const ENV_AUTH_SCHEME: &str = "VIRTUELE_AUTH_SCHEME";

/// Where access and refresh tokens are kept between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorageKind {
    /// Not persisted; the session ends with the process
    Memory,
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub timeout_secs: u64,
    pub auth_scheme: AuthScheme,
    pub token_storage: TokenStorageKind,
    pub last_username: Option<String>,
    pub log_to_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            auth_scheme: AuthScheme::default(),
            token_storage: TokenStorageKind::default(),
            last_username: None,
            log_to_file: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
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

    /// Apply `VIRTUELE_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.is_empty()) {
            self.base_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.parse() {
                Ok(secs) => self.timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
        if let Some(raw) = lookup(ENV_AUTH_SCHEME) {
            match raw.parse() {
                Ok(scheme) => self.auth_scheme = scheme,
                Err(e) => warn!(error = %e, "Ignoring invalid {}", ENV_AUTH_SCHEME),
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Build the configured token storage backend.
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        let store: Arc<dyn TokenStore> = match self.token_storage {
            TokenStorageKind::Memory => Arc::new(MemoryTokenStore::new()),
            TokenStorageKind::File => Arc::new(FileTokenStore::in_dir(Self::config_dir()?)),
            TokenStorageKind::Keyring => Arc::new(KeyringTokenStore::new()),
        };
        Ok(store)
    }

    pub fn session_client(&self, store: Arc<dyn TokenStore>) -> Result<SessionClient> {
        Ok(SessionClient::with_timeout(&self.base_url, store, self.timeout())?
            .with_scheme(self.auth_scheme))
    }

    pub fn catalog_client(&self) -> Result<CatalogClient> {
        Ok(CatalogClient::new(&self.base_url, self.timeout())?)
    }
}
