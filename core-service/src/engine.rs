//! # Feed Engine
//!
//! The explicit service object wiring the refresh and sync subsystems
//! together. Constructed once at startup and passed by handle to
//! collaborators; there is no ambient global lookup.
//!
//! ## Wiring
//!
//! ```text
//! store changes ──channel──> EventBatcher ──batches──> SyncReconciler ──> remote calls
//!
//! refresh requests ──> reload queue (bound 10) ──> ReloadCoordinator ──> write queue (bound 1)
//! download requests ──> download queue (bound 3) ──> DownloadCoordinator
//! ```
//!
//! Shutdown stops new work, cancels refreshes and downloads, waits for the
//! write queue to drain, and flushes undelivered sync records to disk.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bridge_traits::{
    CredentialPrompt, CredentialStore, EntityStore, FeedId, HttpClient, ItemChange,
    Subscription,
};
use core_refresh::{
    DownloadCoordinator, DownloadId, DownloadJob, DownloadTask, JsonFileValidatorStore,
    ReloadCoordinator, ReloadTask, ValidatorStore,
};
use core_runtime::events::{EngineEvent, EventBus};
use core_runtime::EngineConfig;
use core_sync::{
    load_pending, store_pending, PasswordAuthenticator, RemoteSyncClient, SyncRecord,
    SyncReconciler,
};
use core_tasks::{EventBatcher, Priority, ScheduleOutcome, TaskQueue};

use crate::error::{EngineError, Result};

/// Bridge implementations the engine requires from its host
pub struct EngineDependencies {
    pub http: Arc<dyn HttpClient>,
    pub store: Arc<dyn EntityStore>,
    pub credentials: Arc<dyn CredentialStore>,
    /// Interactive credential prompt; absent in headless hosts
    pub prompt: Option<Arc<dyn CredentialPrompt>>,
}

impl EngineDependencies {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn EntityStore>,
        credentials: Arc<dyn CredentialStore>,
        prompt: Option<Arc<dyn CredentialPrompt>>,
    ) -> Self {
        Self {
            http,
            store,
            credentials,
            prompt,
        }
    }
}

/// The feed refresh and remote sync engine
pub struct FeedEngine {
    config: EngineConfig,
    events: EventBus,
    reload_queue: Arc<TaskQueue>,
    download_queue: Arc<TaskQueue>,
    write_queue: Arc<TaskQueue>,
    reload: Arc<ReloadCoordinator>,
    downloads: Arc<DownloadCoordinator>,
    batcher: EventBatcher<ItemChange>,
    reconciler: Option<Arc<SyncReconciler>>,
    pending_path: PathBuf,
    subscription: Subscription,
    shutdown: CancellationToken,
}

impl FeedEngine {
    /// Construct and start the engine.
    ///
    /// Spawns the store-change forwarder and, when a sync endpoint is
    /// configured, the reconciler consumer with any pending records
    /// restored from disk.
    pub async fn start(config: EngineConfig, deps: EngineDependencies) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let events = EventBus::new(config.event_buffer_size);
        let shutdown = CancellationToken::new();

        let reload_queue = Arc::new(TaskQueue::new("reloads", config.reload_concurrency));
        let download_queue = Arc::new(TaskQueue::new("downloads", config.download_concurrency));
        let write_queue = Arc::new(TaskQueue::new("writes", 1));

        let validators: Arc<dyn ValidatorStore> = Arc::new(
            JsonFileValidatorStore::open(config.data_dir.join("validators.json"))
                .await
                .map_err(|e| EngineError::Persistence(e.to_string()))?,
        );

        let reload = Arc::new(ReloadCoordinator::new(
            Arc::clone(&deps.http),
            Arc::clone(&deps.store),
            validators,
            Arc::clone(&write_queue),
            Arc::clone(&deps.credentials),
            deps.prompt.clone(),
            events.clone(),
            config.fetch_timeout,
        ));

        let downloads = Arc::new(DownloadCoordinator::new(
            Arc::clone(&deps.http),
            Arc::clone(&deps.credentials),
            deps.prompt.clone(),
            events.clone(),
            config.download_timeout,
        ));

        let (batcher, batch_rx) = EventBatcher::channel(config.quiet_period);

        // Store changes flow through a channel into the batcher
        let (subscription, mut change_rx) = deps.store.subscribe_items();
        {
            let batcher = batcher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let change = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        change = change_rx.recv() => match change {
                            Some(change) => change,
                            None => break,
                        },
                    };
                    batcher.add(change).await;
                }
            });
        }

        let pending_path = config.data_dir.join("pending-sync.json");
        let reconciler = match &config.sync_endpoint {
            Some(endpoint) => {
                let remote = Arc::new(RemoteSyncClient::new(
                    Arc::clone(&deps.http),
                    endpoint.clone(),
                ));
                let authenticator = Arc::new(PasswordAuthenticator::new(
                    Arc::clone(&deps.http),
                    Arc::clone(&deps.credentials),
                    endpoint.clone(),
                ));
                let reconciler = Arc::new(SyncReconciler::new(
                    remote,
                    authenticator,
                    events.clone(),
                ));

                let restored = load_pending(&pending_path)
                    .await
                    .map_err(|e| EngineError::Persistence(e.to_string()))?;
                reconciler.restore_pending(restored).await;

                tokio::spawn(Arc::clone(&reconciler).run(batch_rx, shutdown.child_token()));
                Some(reconciler)
            }
            None => None,
        };

        info!(
            reload_bound = config.reload_concurrency,
            download_bound = config.download_concurrency,
            sync = reconciler.is_some(),
            "Feed engine started"
        );

        Ok(Self {
            config,
            events,
            reload_queue,
            download_queue,
            write_queue,
            reload,
            downloads,
            batcher,
            reconciler,
            pending_path,
            subscription,
            shutdown,
        })
    }

    /// Schedule a high-priority refresh of a single feed
    pub async fn refresh_feed(&self, feed: FeedId) -> ScheduleOutcome {
        self.reload_queue
            .schedule(Arc::new(ReloadTask::new(
                Arc::clone(&self.reload),
                feed,
                Priority::High,
            )))
            .await
    }

    /// Schedule a bulk refresh; returns how many feeds were actually queued
    /// (feeds already refreshing are skipped by de-duplication)
    pub async fn refresh_feeds(&self, feeds: Vec<FeedId>) -> usize {
        let mut scheduled = 0;
        for feed in feeds {
            let outcome = self
                .reload_queue
                .schedule(Arc::new(ReloadTask::new(
                    Arc::clone(&self.reload),
                    feed,
                    Priority::Normal,
                )))
                .await;
            if outcome.is_scheduled() {
                scheduled += 1;
            }
        }
        scheduled
    }

    /// Whether a refresh for the feed is pending or running
    pub async fn is_refreshing(&self, feed: &FeedId) -> bool {
        self.reload_queue.is_queued(&ReloadTask::key_for(feed)).await
    }

    /// Create a download job targeting the configured download directory
    pub fn new_download_job(&self, url: impl Into<String>) -> DownloadJob {
        DownloadJob::new(url, &self.config.download_dir)
    }

    /// Schedule an attachment download
    pub async fn schedule_download(&self, job: DownloadJob) -> ScheduleOutcome {
        self.download_queue
            .schedule(Arc::new(DownloadTask::new(
                Arc::clone(&self.downloads),
                job,
            )))
            .await
    }

    /// Re-schedule a failed download job verbatim
    pub async fn retry_download(&self, job: DownloadJob) -> ScheduleOutcome {
        self.schedule_download(job).await
    }

    /// Cancel one in-flight download
    pub async fn cancel_download(&self, id: &DownloadId) -> bool {
        self.downloads.cancel_download(id).await
    }

    /// Subscribe to engine events
    pub fn subscribe_events(&self) -> core_runtime::events::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The engine's event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stop the engine.
    ///
    /// New work is refused, refreshes and downloads are cancelled, the
    /// write queue drains its accepted writes, and undelivered sync records
    /// (including changes still buffered in the batcher) are flushed to
    /// disk.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down feed engine");

        self.subscription.unsubscribe();
        self.shutdown.cancel();

        let buffered = self.batcher.drain().await;
        self.batcher.cancel().await;
        if let Some(reconciler) = &self.reconciler {
            let leftovers: Vec<SyncRecord> =
                buffered.iter().filter_map(SyncRecord::from_change).collect();
            if !leftovers.is_empty() {
                reconciler.restore_pending(leftovers).await;
            }
        }

        self.reload_queue.cancel(true).await;
        self.downloads.shutdown_all().await;
        self.download_queue.cancel(true).await;

        // Accepted writes finish rather than being abandoned
        self.write_queue.shutdown().await;

        if let Some(reconciler) = &self.reconciler {
            let snapshot = reconciler.pending_snapshot().await;
            if let Err(error) = store_pending(&self.pending_path, &snapshot).await {
                warn!(error = %error, "Failed to persist pending sync records");
                return Err(EngineError::Persistence(error.to_string()));
            }
        }

        info!("Feed engine stopped");
        Ok(())
    }
}
