//! Remote sync API client.
//!
//! The remote service accepts one form-encoded POST per equivalence group:
//! an auth token, the item identifiers, the stream identifiers, and two tag
//! lists (add/remove). Authentication is a separate form POST exchanging
//! stored credentials for an opaque token good for a whole reconciliation
//! pass.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, CredentialStore, HttpClient, HttpRequest, ItemId, StreamId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::record::EquivalenceGroup;

/// Tag carried by read items
pub const TAG_READ: &str = "read";
/// Tag carried by starred items
pub const TAG_STARRED: &str = "starred";

/// Opaque token authorizing one reconciliation pass.
///
/// `Debug` redacts the token value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthToken").field(&"***").finish()
    }
}

/// One remote edit call: many items, one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEditCall {
    pub items: Vec<ItemId>,
    pub streams: Vec<StreamId>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl EquivalenceGroup {
    /// Derive the remote call for this group: the union of tags to add and
    /// remove from its shape, carried for every item identifier at once.
    pub fn to_call(&self) -> RemoteEditCall {
        let mut add = Vec::new();
        let mut remove = Vec::new();

        if self.shape.mark_read {
            add.push(TAG_READ.to_string());
        }
        if self.shape.mark_unread {
            remove.push(TAG_READ.to_string());
        }
        if self.shape.star {
            add.push(TAG_STARRED.to_string());
        }
        if self.shape.unstar {
            remove.push(TAG_STARRED.to_string());
        }
        add.extend(self.shape.labels_added.iter().cloned());
        remove.extend(self.shape.labels_removed.iter().cloned());

        RemoteEditCall {
            items: self.records.iter().map(|r| r.key.item.clone()).collect(),
            streams: vec![self.stream.clone()],
            add,
            remove,
        }
    }
}

/// Obtains one auth token per reconciliation pass
#[async_trait]
pub trait SyncAuthenticator: Send + Sync {
    /// # Errors
    ///
    /// `SyncError::CredentialsUnavailable` when no usable credentials exist
    /// or the service rejects them; `SyncError::Connection` when the token
    /// endpoint cannot be reached.
    async fn authenticate(&self) -> Result<AuthToken>;
}

/// The remote edit-tags boundary
#[async_trait]
pub trait RemoteSyncApi: Send + Sync {
    async fn edit_tags(&self, token: &AuthToken, call: &RemoteEditCall) -> Result<()>;
}

/// HTTP implementation of the remote sync API
pub struct RemoteSyncClient {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    timeout: Duration,
}

impl RemoteSyncClient {
    pub fn new(http: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl RemoteSyncApi for RemoteSyncClient {
    async fn edit_tags(&self, token: &AuthToken, call: &RemoteEditCall) -> Result<()> {
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        for item in &call.items {
            pairs.push(("i", item.as_str()));
        }
        for stream in &call.streams {
            pairs.push(("s", stream.as_str()));
        }
        for tag in &call.add {
            pairs.push(("a", tag));
        }
        for tag in &call.remove {
            pairs.push(("r", tag));
        }
        pairs.push(("T", token.as_str()));

        let request = HttpRequest::post(format!("{}/reader/api/0/edit-tag", self.endpoint))
            .form(&pairs)
            .timeout(self.timeout);

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| SyncError::Remote(e.to_string()))?;

        debug!(
            items = call.items.len(),
            add = call.add.len(),
            remove = call.remove.len(),
            status = response.status,
            "Issued remote edit call"
        );
        Ok(())
    }
}

/// Authenticator exchanging stored credentials for a session token
pub struct PasswordAuthenticator {
    http: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialStore>,
    endpoint: String,
    timeout: Duration,
}

impl PasswordAuthenticator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialStore>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl SyncAuthenticator for PasswordAuthenticator {
    async fn authenticate(&self) -> Result<AuthToken> {
        let credentials = self
            .credentials
            .get(&self.endpoint, None)
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?
            .ok_or(SyncError::CredentialsUnavailable)?;

        let request = HttpRequest::post(format!("{}/accounts/ClientLogin", self.endpoint))
            .form(&[
                ("Email", credentials.username.as_str()),
                ("Passwd", credentials.password.as_str()),
            ])
            .timeout(self.timeout);

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(BridgeError::AuthRequired { .. }) => {
                return Err(SyncError::CredentialsUnavailable)
            }
            Err(error) => return Err(SyncError::Connection(error.to_string())),
        };

        let body = response
            .text()
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        parse_auth_token(&body).ok_or(SyncError::CredentialsUnavailable)
    }
}

/// Extract the token from a `ClientLogin`-style response body.
fn parse_auth_token(body: &str) -> Option<AuthToken> {
    for line in body.lines() {
        if let Some(token) = line.trim().strip_prefix("Auth=") {
            if !token.is_empty() {
                return Some(AuthToken::new(token));
            }
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && !trimmed.contains('=') && !trimmed.contains('\n') {
        return Some(AuthToken::new(trimmed));
    }
    None
}
