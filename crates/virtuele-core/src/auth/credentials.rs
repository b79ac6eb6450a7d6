use async_trait::async_trait;
use keyring::Entry;
use tracing::warn;

use super::store::{StoreError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

const SERVICE_NAME: &str = "virtuele";

/// Token storage in the OS keychain.
///
/// Each token is a separate keychain entry under the `virtuele` service,
/// named `access_token` and `refresh_token`.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Use a custom keychain service name (separate profiles, tests).
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key)
            .map_err(|e| StoreError::Keyring(format!("Failed to create keyring entry: {}", e)))
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::Keyring(format!("Failed to store {} in keychain: {}", key, e)))
    }

    fn get(&self, key: &str) -> Option<String> {
        let entry = match self.entry(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, key, "Keychain unavailable");
                return None;
            }
        };
        match entry.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, key, "Failed to read token from keychain");
                None
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Keyring(format!(
                "Failed to delete {} from keychain: {}",
                key, e
            ))),
        }
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        let previous = self.get(REFRESH_TOKEN_KEY);
        self.store(REFRESH_TOKEN_KEY, refresh)?;

        if let Err(e) = self.store(ACCESS_TOKEN_KEY, access) {
            // Never leave a new refresh token paired with the old access token
            let rollback = match previous {
                Some(ref old) => self.store(REFRESH_TOKEN_KEY, old),
                None => self.delete(REFRESH_TOKEN_KEY),
            };
            if let Err(rollback_err) = rollback {
                warn!(error = %rollback_err, "Failed to roll back refresh token");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn set_access(&self, access: &str) -> Result<(), StoreError> {
        self.store(ACCESS_TOKEN_KEY, access)
    }

    async fn access(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY)
    }

    async fn refresh(&self) -> Option<String> {
        self.get(REFRESH_TOKEN_KEY)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        // Attempt both deletions so one failure never leaves half a session behind
        let access = self.delete(ACCESS_TOKEN_KEY);
        let refresh = self.delete(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
