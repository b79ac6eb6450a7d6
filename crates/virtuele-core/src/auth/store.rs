use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Fixed storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Fixed storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Token file name in the config directory
const TOKEN_FILE: &str = "tokens.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token file error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to (de)serialize tokens: {0}")]
    Serialization(String),

    #[error("Keyring error: {0}")]
    Keyring(String),
}

impl StoreError {
    fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Access and refresh token pair as issued by the identity endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access: String,
    pub refresh: String,
}

impl Credentials {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Holder of the access and refresh tokens.
///
/// The store is the single source of truth for whether a user is logged in.
/// Implementations must let reads observe the most recent write.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Replace both tokens.
    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), StoreError>;

    /// Replace the access token, leaving the refresh token untouched.
    async fn set_access(&self, access: &str) -> Result<(), StoreError>;

    async fn access(&self) -> Option<String>;

    async fn refresh(&self) -> Option<String>;

    /// Remove both tokens. Clearing an empty store is not an error.
    async fn clear(&self) -> Result<(), StoreError>;

    async fn is_authenticated(&self) -> bool {
        self.access().await.is_some() && self.refresh().await.is_some()
    }

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Default, Clone)]
struct TokenSlots {
    access: Option<String>,
    refresh: Option<String>,
}

/// In-memory token storage. Used by tests and when persistence is off.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slots: RwLock<TokenSlots>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a token pair.
    pub fn with_tokens(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            slots: RwLock::new(TokenSlots {
                access: Some(access.into()),
                refresh: Some(refresh.into()),
            }),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        let mut slots = self.slots.write().await;
        slots.access = Some(access.to_string());
        slots.refresh = Some(refresh.to_string());
        Ok(())
    }

    async fn set_access(&self, access: &str) -> Result<(), StoreError> {
        self.slots.write().await.access = Some(access.to_string());
        Ok(())
    }

    async fn access(&self) -> Option<String> {
        self.slots.read().await.access.clone()
    }

    async fn refresh(&self) -> Option<String> {
        self.slots.read().await.refresh.clone()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slots.write().await = TokenSlots::default();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// File backend
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(rename = "access_token", default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(rename = "refresh_token", default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

/// JSON token file with 0600 permissions.
///
/// The file is re-read on every access so separate processes see each
/// other's logins. Writes within this process are serialized by a lock.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Store tokens as `tokens.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(TOKEN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<TokenFile, StoreError> {
        if !self.path.exists() {
            return Ok(TokenFile::default());
        }
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(TokenFile::default());
        }
        serde_json::from_str(&contents).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read the file, treating any failure as "no tokens".
    fn read_lenient(&self) -> TokenFile {
        match self.read_file() {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "Failed to read token file, treating as logged out");
                TokenFile::default()
            }
        }
    }

    fn write_file(&self, file: &TokenFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let contents = serde_json::to_string_pretty(file)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| StoreError::io(&self.path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .map_err(|e| StoreError::io(&self.path, format!("chmod: {}", e)))?;
        }

        debug!(path = %self.path.display(), "Tokens saved");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_file(&TokenFile {
            access: Some(access.to_string()),
            refresh: Some(refresh.to_string()),
        })
    }

    async fn set_access(&self, access: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file()?;
        file.access = Some(access.to_string());
        self.write_file(&file)
    }

    async fn access(&self) -> Option<String> {
        self.read_lenient().access
    }

    async fn refresh(&self) -> Option<String> {
        self.read_lenient().refresh
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
