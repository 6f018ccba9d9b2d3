//! Credential Boundary
//!
//! Abstracts credential lookup and the synchronous credential prompt the
//! host GUI provides. The engine blocks the calling task on the prompt's
//! round-trip; marshalling onto the UI thread is the host's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A username/password pair.
///
/// `Debug` redacts the password so credentials never leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Persistent credential storage
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up stored credentials for an address and optional realm
    async fn get(&self, url: &str, realm: Option<&str>) -> Result<Option<Credentials>>;

    /// Store credentials for an address and optional realm
    async fn set(&self, url: &str, realm: Option<&str>, credentials: &Credentials) -> Result<()>;

    /// Remove stored credentials
    async fn delete(&self, url: &str, realm: Option<&str>) -> Result<()>;
}

/// Interactive credential prompt.
///
/// Returns `Ok(None)` when the user explicitly cancelled the prompt.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn prompt(&self, url: &str, realm: Option<&str>) -> Result<Option<Credentials>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials::new("alice", "hunter2");
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
