//! # Reload Coordinator
//!
//! Orchestrates one feed-refresh cycle.
//!
//! ## Cycle
//!
//! ```text
//! START → FETCH → UNCHANGED  → DONE
//!               → FETCHED    → MERGE → DONE
//!               → AUTH       → PROMPT → retry | give up
//!               → FAILED     → DONE (error flag set)
//! ```
//!
//! Cancellation is checked before every transition; a cancelled cycle stops
//! without touching the feed's error flag. All writes to persisted feed
//! state go through the single-concurrency write queue, never the network
//! task. Concurrent cycles for one feed are prevented by the reload queue's
//! de-duplication (task key = feed identity).

use async_trait::async_trait;
use bridge_traits::{
    CredentialPrompt, CredentialStore, Credentials, EntityStore, FeedId, FeedResource,
    HttpClient, HttpRequest, MergeStats,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use core_runtime::events::{EngineEvent, EventBus, ReloadEvent};
use core_tasks::{
    Priority, QueueTask, ScheduleOutcome, TaskContext, TaskError, TaskKey, TaskOutcome,
    TaskQueue,
};

use crate::error::{RefreshError, Result};
use crate::fetcher::{ConditionalFetcher, FetchOutcome};
use crate::validator::ValidatorStore;

/// Final result of a refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Stored content is still current
    Unchanged,
    /// New content was merged into persisted state
    Merged(MergeStats),
    /// Credentials are needed and no prompt surface is available
    AuthPending,
    /// The user cancelled the credential prompt
    AuthDeclined,
}

/// Orchestrates feed refresh cycles
pub struct ReloadCoordinator {
    fetcher: ConditionalFetcher,
    store: Arc<dyn EntityStore>,
    validators: Arc<dyn ValidatorStore>,
    write_queue: Arc<TaskQueue>,
    credentials: Arc<dyn CredentialStore>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    events: EventBus,
    http: Arc<dyn HttpClient>,
    icon_timeout: Duration,
}

impl ReloadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn EntityStore>,
        validators: Arc<dyn ValidatorStore>,
        write_queue: Arc<TaskQueue>,
        credentials: Arc<dyn CredentialStore>,
        prompt: Option<Arc<dyn CredentialPrompt>>,
        events: EventBus,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher: ConditionalFetcher::new(Arc::clone(&http), fetch_timeout),
            store,
            validators,
            write_queue,
            credentials,
            prompt,
            events,
            http,
            icon_timeout: Duration::from_secs(10),
        }
    }

    /// Run one refresh cycle for a feed.
    ///
    /// # Errors
    ///
    /// - `RefreshError::Cancelled` when the cycle was cancelled; no state
    ///   was mutated
    /// - `RefreshError::Feed` for connection or parse failures; the feed's
    ///   error flag has been set and the message carries the feed's title
    ///   and address
    /// - `RefreshError::Persistence` when merging fetched content failed
    #[instrument(skip(self, cancel), fields(feed = %feed_id))]
    pub async fn refresh(
        &self,
        feed_id: &FeedId,
        cancel: &CancellationToken,
    ) -> Result<ReloadOutcome> {
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let feed = self
            .store
            .load_feed(feed_id)
            .await
            .map_err(|e| RefreshError::Persistence(e.to_string()))?
            .ok_or_else(|| RefreshError::UnknownFeed {
                id: feed_id.to_string(),
            })?;

        self.events
            .emit(EngineEvent::Reload(ReloadEvent::Started {
                feed: feed_id.to_string(),
            }))
            .ok();

        let stored_validator = self.validators.load(feed_id).await?;

        let mut credentials: Option<Credentials> = None;
        let mut prompted = false;

        loop {
            if cancel.is_cancelled() {
                return Err(RefreshError::Cancelled);
            }

            let outcome = match self
                .fetcher
                .fetch(
                    &feed.url,
                    stored_validator.as_ref(),
                    credentials.clone(),
                    cancel,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(RefreshError::Cancelled) => return Err(RefreshError::Cancelled),
                Err(error) => return self.fail(&feed, error.to_string()).await,
            };

            match outcome {
                FetchOutcome::Unchanged => {
                    if feed.has_error {
                        self.set_error_flag(&feed, false).await?;
                    }
                    self.events
                        .emit(EngineEvent::Reload(ReloadEvent::Unchanged {
                            feed: feed_id.to_string(),
                        }))
                        .ok();
                    return Ok(ReloadOutcome::Unchanged);
                }

                FetchOutcome::Fetched(resource) => {
                    if cancel.is_cancelled() {
                        return Err(RefreshError::Cancelled);
                    }

                    let stats = self.persist_merge(&feed, resource.body).await?;

                    match resource.validator {
                        Some(validator) => self.validators.save(feed_id, validator).await?,
                        // The server stopped handing out validators; the
                        // stored pair is stale
                        None if stored_validator.is_some() => {
                            self.validators.delete(feed_id).await?
                        }
                        None => {}
                    }

                    let mut updated = feed.clone();
                    updated.has_error = false;
                    updated.last_refreshed_at = Some(chrono::Utc::now().timestamp());
                    self.persist_feed(updated).await?;

                    self.fetch_icon_if_missing(&feed).await;

                    self.events
                        .emit(EngineEvent::Reload(ReloadEvent::Merged {
                            feed: feed_id.to_string(),
                            items_added: stats.items_added,
                            items_updated: stats.items_updated,
                        }))
                        .ok();
                    return Ok(ReloadOutcome::Merged(stats));
                }

                FetchOutcome::AuthRequired { realm } => {
                    // Stored credentials first, one prompt after that
                    if credentials.is_none() && !prompted {
                        match self.credentials.get(&feed.url, realm.as_deref()).await {
                            Ok(Some(stored)) => {
                                debug!(feed = %feed_id, "Retrying with stored credentials");
                                credentials = Some(stored);
                                continue;
                            }
                            Ok(None) => {}
                            Err(error) => {
                                warn!(feed = %feed_id, error = %error, "Credential lookup failed");
                            }
                        }
                    }

                    if prompted {
                        // Freshly prompted credentials were refused
                        return self
                            .fail(&feed, "authentication failed".to_string())
                            .await;
                    }

                    let Some(prompt) = &self.prompt else {
                        self.events
                            .emit(EngineEvent::Reload(ReloadEvent::AuthPending {
                                feed: feed_id.to_string(),
                            }))
                            .ok();
                        return Ok(ReloadOutcome::AuthPending);
                    };

                    if cancel.is_cancelled() {
                        return Err(RefreshError::Cancelled);
                    }

                    match prompt.prompt(&feed.url, realm.as_deref()).await {
                        Ok(Some(supplied)) => {
                            prompted = true;
                            if let Err(error) = self
                                .credentials
                                .set(&feed.url, realm.as_deref(), &supplied)
                                .await
                            {
                                warn!(feed = %feed_id, error = %error, "Storing credentials failed");
                            }
                            credentials = Some(supplied);
                        }
                        Ok(None) => {
                            // Explicit cancel sets the error indicator
                            self.set_error_flag(&feed, true).await?;
                            self.events
                                .emit(EngineEvent::Reload(ReloadEvent::AuthPending {
                                    feed: feed_id.to_string(),
                                }))
                                .ok();
                            return Ok(ReloadOutcome::AuthDeclined);
                        }
                        Err(error) => {
                            return self.fail(&feed, error.to_string()).await;
                        }
                    }
                }
            }
        }
    }

    /// Terminal failure: set the error flag and wrap the message with the
    /// feed's display name and address.
    async fn fail(&self, feed: &FeedResource, message: String) -> Result<ReloadOutcome> {
        if !feed.has_error {
            if let Err(error) = self.set_error_flag(feed, true).await {
                warn!(feed = %feed.id, error = %error, "Failed to persist error flag");
            }
        }

        let wrapped = RefreshError::Feed {
            title: feed.title.clone(),
            url: feed.url.clone(),
            message,
        };
        self.events
            .emit(EngineEvent::Reload(ReloadEvent::Failed {
                feed: feed.id.to_string(),
                message: wrapped.to_string(),
            }))
            .ok();
        Err(wrapped)
    }

    async fn set_error_flag(&self, feed: &FeedResource, has_error: bool) -> Result<()> {
        if feed.has_error == has_error {
            return Ok(());
        }
        let mut updated = feed.clone();
        updated.has_error = has_error;
        self.persist_feed(updated).await
    }

    /// Merge fetched content on the write queue and wait for it.
    async fn persist_merge(&self, feed: &FeedResource, document: Bytes) -> Result<MergeStats> {
        let stats = Arc::new(Mutex::new(None));
        let task = Arc::new(MergeDocumentTask {
            store: Arc::clone(&self.store),
            feed_id: feed.id.clone(),
            document,
            stats: Arc::clone(&stats),
        });

        match self.write_queue.schedule(task).await {
            ScheduleOutcome::Scheduled(handle) => match handle.outcome().await {
                TaskOutcome::Completed => Ok(stats.lock().await.take().unwrap_or_default()),
                TaskOutcome::Cancelled => Err(RefreshError::Cancelled),
                TaskOutcome::Failed(message) => Err(RefreshError::Persistence(message)),
            },
            _ => Err(RefreshError::Persistence("write queue closed".to_string())),
        }
    }

    /// Persist feed state on the write queue and wait for it.
    async fn persist_feed(&self, feed: FeedResource) -> Result<()> {
        let task = Arc::new(SaveFeedTask {
            store: Arc::clone(&self.store),
            feed,
        });

        match self.write_queue.schedule(task).await {
            ScheduleOutcome::Scheduled(handle) => match handle.outcome().await {
                TaskOutcome::Completed => Ok(()),
                TaskOutcome::Cancelled => Err(RefreshError::Cancelled),
                TaskOutcome::Failed(message) => Err(RefreshError::Persistence(message)),
            },
            _ => Err(RefreshError::Persistence("write queue closed".to_string())),
        }
    }

    /// Best-effort favicon fetch; failures are logged and swallowed.
    async fn fetch_icon_if_missing(&self, feed: &FeedResource) {
        match self.store.has_icon(&feed.id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(error) => {
                debug!(feed = %feed.id, error = %error, "Icon lookup failed");
                return;
            }
        }

        let Some(icon_url) = favicon_url(feed) else {
            return;
        };

        let request = HttpRequest::get(icon_url.clone()).timeout(self.icon_timeout);
        match self.http.execute(request).await {
            Ok(response) if !response.body.is_empty() => {
                if let Err(error) = self.store.save_icon(&feed.id, response.body).await {
                    debug!(feed = %feed.id, error = %error, "Storing feed icon failed");
                }
            }
            Ok(_) => debug!(feed = %feed.id, url = %icon_url, "Empty icon response"),
            Err(error) => {
                debug!(feed = %feed.id, url = %icon_url, error = %error, "Icon fetch failed")
            }
        }
    }
}

/// Derive the site favicon address for a feed.
fn favicon_url(feed: &FeedResource) -> Option<String> {
    let base = feed.home_url.as_deref().unwrap_or(&feed.url);
    let parsed = url::Url::parse(base).ok()?;
    parsed.join("/favicon.ico").ok().map(|u| u.to_string())
}

/// Write-queue task merging a fetched document into the store.
///
/// Write tasks carry unique keys: the write queue's contract is
/// serialization, not de-duplication.
struct MergeDocumentTask {
    store: Arc<dyn EntityStore>,
    feed_id: FeedId,
    document: Bytes,
    stats: Arc<Mutex<Option<MergeStats>>>,
}

#[async_trait]
impl QueueTask for MergeDocumentTask {
    fn key(&self) -> TaskKey {
        TaskKey::new(format!("merge:{}:{}", self.feed_id, Uuid::new_v4()))
    }

    async fn run(&self, _context: TaskContext) -> std::result::Result<(), TaskError> {
        let stats = self
            .store
            .merge_document(&self.feed_id, self.document.clone())
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        *self.stats.lock().await = Some(stats);
        Ok(())
    }
}

/// Write-queue task persisting feed state.
struct SaveFeedTask {
    store: Arc<dyn EntityStore>,
    feed: FeedResource,
}

#[async_trait]
impl QueueTask for SaveFeedTask {
    fn key(&self) -> TaskKey {
        TaskKey::new(format!("save:{}:{}", self.feed.id, Uuid::new_v4()))
    }

    async fn run(&self, _context: TaskContext) -> std::result::Result<(), TaskError> {
        self.store
            .save_feed(&self.feed)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))
    }
}

/// Schedulable refresh cycle; the task key is the feed identity so the
/// reload queue never runs two cycles for one feed concurrently.
pub struct ReloadTask {
    coordinator: Arc<ReloadCoordinator>,
    feed: FeedId,
    priority: Priority,
}

impl ReloadTask {
    pub fn new(coordinator: Arc<ReloadCoordinator>, feed: FeedId, priority: Priority) -> Self {
        Self {
            coordinator,
            feed,
            priority,
        }
    }

    /// The queue key a refresh of `feed` runs under
    pub fn key_for(feed: &FeedId) -> TaskKey {
        TaskKey::new(format!("reload:{}", feed))
    }
}

#[async_trait]
impl QueueTask for ReloadTask {
    fn key(&self) -> TaskKey {
        Self::key_for(&self.feed)
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    async fn run(&self, context: TaskContext) -> std::result::Result<(), TaskError> {
        match self.coordinator.refresh(&self.feed, &context.cancel).await {
            Ok(_) => Ok(()),
            Err(RefreshError::Cancelled) => Err(TaskError::Cancelled),
            Err(error) => Err(TaskError::Failed(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_favicon_url_prefers_home_url() {
        let feed = FeedResource {
            id: FeedId::new("feed-1"),
            url: "https://feeds.example.com/all.xml".to_string(),
            title: "Example".to_string(),
            home_url: Some("https://example.com/blog/".to_string()),
            has_error: false,
            last_refreshed_at: None,
        };
        assert_eq!(
            favicon_url(&feed).as_deref(),
            Some("https://example.com/favicon.ico")
        );
    }

    #[test]
    fn test_favicon_url_falls_back_to_feed_url() {
        let feed = FeedResource {
            id: FeedId::new("feed-1"),
            url: "https://feeds.example.com/all.xml".to_string(),
            title: "Example".to_string(),
            home_url: None,
            has_error: false,
            last_refreshed_at: None,
        };
        assert_eq!(
            favicon_url(&feed).as_deref(),
            Some("https://feeds.example.com/favicon.ico")
        );
    }
}
