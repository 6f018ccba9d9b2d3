//! Entity Store Boundary
//!
//! The engine treats the persistent entity store as an authoritative,
//! opaque load/save API with change notification. The store's own
//! consistency model is not defined here.
//!
//! Change notifications are delivered over a channel rather than through
//! synchronous in-process callbacks: [`EntityStore::subscribe_items`] returns
//! a receiver plus a [`Subscription`] handle that cancels delivery when
//! dropped or explicitly unsubscribed.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Identifier of a feed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedId(String);

impl FeedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single news item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the stream (remote feed/folder) containing an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted state of a feed resource, as seen by the refresh engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResource {
    /// Unique identifier
    pub id: FeedId,
    /// Address the feed is fetched from
    pub url: String,
    /// Display title
    pub title: String,
    /// Site address the feed belongs to, when known
    pub home_url: Option<String>,
    /// Visible error indicator; set and cleared only by the reload engine
    pub has_error: bool,
    /// Unix timestamp of the last successful refresh
    pub last_refreshed_at: Option<i64>,
}

/// Outcome of merging a fetched document into the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub items_added: u64,
    pub items_updated: u64,
}

/// Snapshot of the sync-relevant state of one item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStateSnapshot {
    pub read: bool,
    pub starred: bool,
    /// Terminal deleted/hidden state
    pub hidden: bool,
    pub labels: BTreeSet<String>,
}

/// An immutable description of one state transition for one item.
///
/// Produced by the entity store's change notifications and consumed once by
/// the event batcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChange {
    pub item: ItemId,
    pub stream: StreamId,
    /// Whether the item belongs to an externally synchronized stream
    pub synced: bool,
    pub old: ItemStateSnapshot,
    pub new: ItemStateSnapshot,
}

/// Handle for an active change subscription.
///
/// Delivery stops when `unsubscribe` is called or the handle is dropped.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Token the store implementation watches to stop delivering changes
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Entity store boundary trait
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Load the persisted state of a feed
    async fn load_feed(&self, id: &FeedId) -> Result<Option<FeedResource>>;

    /// Persist the state of a feed
    async fn save_feed(&self, feed: &FeedResource) -> Result<()>;

    /// Merge a freshly fetched feed document into persisted state.
    ///
    /// Parsing the document is the store's concern; the engine only routes
    /// the payload through its serialized write queue.
    async fn merge_document(&self, id: &FeedId, document: Bytes) -> Result<MergeStats>;

    /// Whether a representative icon is already stored for the feed
    async fn has_icon(&self, id: &FeedId) -> Result<bool>;

    /// Store a representative icon for the feed
    async fn save_icon(&self, id: &FeedId, icon: Bytes) -> Result<()>;

    /// Subscribe to item state changes.
    ///
    /// Changes arrive on the returned receiver until the subscription is
    /// cancelled.
    fn subscribe_items(&self) -> (Subscription, mpsc::UnboundedReceiver<ItemChange>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_cancels_on_drop() {
        let token = CancellationToken::new();
        {
            let _subscription = Subscription::new(token.clone());
            assert!(!token.is_cancelled());
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_id_round_trip() {
        let id = FeedId::new("feed-1");
        assert_eq!(id.as_str(), "feed-1");
        assert_eq!(id.to_string(), "feed-1");
    }
}
