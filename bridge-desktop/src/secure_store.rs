//! Credential Storage using the OS Keychain

use async_trait::async_trait;
use bridge_traits::{
    credentials::{CredentialStore, Credentials},
    error::{BridgeError, Result},
};
use keyring::Entry;
use tracing::{debug, error};

/// Keyring-based credential store implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    /// Create a new credential store with default service name
    pub fn new() -> Self {
        Self {
            service_name: "feed-reader-core".to_string(),
        }
    }

    /// Create a new credential store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Keyring account key for an address and optional realm
    fn account_key(url: &str, realm: Option<&str>) -> String {
        match realm {
            Some(realm) => format!("{}|{}", url, realm),
            None => url.to_string(),
        }
    }

    fn get_entry(&self, key: &str) -> std::result::Result<Entry, keyring::Error> {
        Entry::new(&self.service_name, key)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn get(&self, url: &str, realm: Option<&str>) -> Result<Option<Credentials>> {
        let key = Self::account_key(url, realm);
        let entry = self.get_entry(&key).map_err(Self::map_keyring_error)?;

        match entry.get_password() {
            Ok(payload) => {
                let credentials = serde_json::from_str(&payload).map_err(|e| {
                    error!(url = url, error = %e, "Failed to decode stored credentials");
                    BridgeError::OperationFailed(format!("Failed to decode credentials: {}", e))
                })?;

                debug!(url = url, "Retrieved credentials from keyring");
                Ok(Some(credentials))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(url = url, "No credentials in keyring");
                Ok(None)
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn set(&self, url: &str, realm: Option<&str>, credentials: &Credentials) -> Result<()> {
        let key = Self::account_key(url, realm);
        let payload = serde_json::to_string(credentials)
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to encode: {}", e)))?;

        let entry = self.get_entry(&key).map_err(Self::map_keyring_error)?;
        entry
            .set_password(&payload)
            .map_err(Self::map_keyring_error)?;

        debug!(url = url, "Stored credentials in keyring");
        Ok(())
    }

    async fn delete(&self, url: &str, realm: Option<&str>) -> Result<()> {
        let key = Self::account_key(url, realm);
        let entry = self.get_entry(&key).map_err(Self::map_keyring_error)?;

        match entry.delete_credential() {
            Ok(_) => {
                debug!(url = url, "Deleted credentials from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                // Already deleted, consider it success
                debug!(url = url, "Credentials not found (already deleted)");
                Ok(())
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }
}
