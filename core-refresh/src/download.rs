//! # Download Coordinator
//!
//! Orchestrates one attachment download: streams bytes to a temporary
//! `.part` file, reports progress and throughput, renames atomically into
//! place on success, and guarantees that a cancelled or failed download
//! leaves nothing behind in the destination directory.
//!
//! Open downloads register their cancellation tokens in a shared map so a
//! global shutdown can force-close every in-progress stream.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, CredentialPrompt, CredentialStore, HttpClient, HttpRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use core_runtime::events::{DownloadEvent, EngineEvent, EventBus};
use core_tasks::{ProgressSink, QueueTask, TaskContext, TaskError, TaskKey, TaskProgress};

use crate::error::{RefreshError, Result};

/// Read chunk size for the download byte loop
const CHUNK_SIZE: usize = 16 * 1024;

/// Minimum interval between throughput recomputations
const THROUGHPUT_INTERVAL: Duration = Duration::from_secs(1);

/// Unique identifier of a download job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of one attachment download.
///
/// A failed job is handed back verbatim so the caller can reschedule it.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: DownloadId,
    /// Source address
    pub url: String,
    /// Directory the finished file is placed in
    pub dest_dir: PathBuf,
    /// Explicit destination name; derived from the URL when absent
    pub file_name: Option<String>,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: DownloadId::new(),
            url: url.into(),
            dest_dir: dest_dir.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Destination filename: the explicit name, the last URL path segment,
    /// or a generated fallback.
    pub fn resolved_file_name(&self) -> String {
        if let Some(name) = &self.file_name {
            return name.clone();
        }

        url::Url::parse(&self.url)
            .ok()
            .and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| format!("download-{}", self.id))
    }

    /// Final destination path
    pub fn final_path(&self) -> PathBuf {
        self.dest_dir.join(self.resolved_file_name())
    }

    /// Temporary path written while the download is in flight
    pub fn temp_path(&self) -> PathBuf {
        self.dest_dir
            .join(format!("{}.part", self.resolved_file_name()))
    }
}

/// Final result of a download
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The file is in place at `path`
    Completed { path: PathBuf },
    /// Cancelled; no partial output remains
    Cancelled,
    /// Failed; the job can be rescheduled verbatim as the retry affordance
    Failed { job: DownloadJob, message: String },
}

impl DownloadOutcome {
    /// Folder containing the finished file, for the "open containing
    /// folder" affordance
    pub fn containing_folder(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Completed { path } => path.parent(),
            _ => None,
        }
    }
}

/// Orchestrates attachment downloads
pub struct DownloadCoordinator {
    http: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialStore>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    events: EventBus,
    open_timeout: Duration,
    /// Cancellation tokens of in-flight downloads, for global shutdown
    open_downloads: Arc<Mutex<HashMap<DownloadId, CancellationToken>>>,
}

impl DownloadCoordinator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialStore>,
        prompt: Option<Arc<dyn CredentialPrompt>>,
        events: EventBus,
        open_timeout: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            prompt,
            events,
            open_timeout,
            open_downloads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run one download to completion, cancellation, or failure.
    ///
    /// Every non-success exit deletes the temporary file; the destination
    /// path is only ever touched by the final atomic rename.
    #[instrument(skip(self, cancel, progress), fields(id = %job.id, url = %job.url))]
    pub async fn run(
        &self,
        job: DownloadJob,
        cancel: CancellationToken,
        progress: &ProgressSink,
    ) -> DownloadOutcome {
        self.open_downloads
            .lock()
            .await
            .insert(job.id.clone(), cancel.clone());

        let result = self.run_inner(&job, &cancel, progress).await;

        self.open_downloads.lock().await.remove(&job.id);

        match result {
            Ok(path) => {
                info!(path = %path.display(), "Download completed");
                self.events
                    .emit(EngineEvent::Download(DownloadEvent::Completed {
                        id: job.id.to_string(),
                        path: path.display().to_string(),
                    }))
                    .ok();
                DownloadOutcome::Completed { path }
            }
            Err(RefreshError::Cancelled) => {
                remove_temp(&job).await;
                debug!("Download cancelled");
                self.events
                    .emit(EngineEvent::Download(DownloadEvent::Cancelled {
                        id: job.id.to_string(),
                    }))
                    .ok();
                DownloadOutcome::Cancelled
            }
            Err(error) => {
                remove_temp(&job).await;
                let message = error.to_string();
                warn!(error = %message, "Download failed");
                self.events
                    .emit(EngineEvent::Download(DownloadEvent::Failed {
                        id: job.id.to_string(),
                        message: message.clone(),
                    }))
                    .ok();
                DownloadOutcome::Failed { job, message }
            }
        }
    }

    /// Cancel a single in-flight download
    pub async fn cancel_download(&self, id: &DownloadId) -> bool {
        match self.open_downloads.lock().await.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Force-cancel every in-flight download; used at global shutdown
    pub async fn shutdown_all(&self) {
        let open = self.open_downloads.lock().await;
        for token in open.values() {
            token.cancel();
        }
        if !open.is_empty() {
            info!(count = open.len(), "Cancelled in-flight downloads");
        }
    }

    async fn run_inner(
        &self,
        job: &DownloadJob,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let final_path = job.final_path();
        let temp_path = job.temp_path();

        let stream = self.open_stream_with_auth(job, cancel).await?;
        let total_bytes = stream.content_length;

        self.events
            .emit(EngineEvent::Download(DownloadEvent::Started {
                id: job.id.to_string(),
                url: job.url.clone(),
                total_bytes,
            }))
            .ok();

        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        tokio::fs::create_dir_all(&job.dest_dir)
            .await
            .map_err(|e| RefreshError::Download(e.to_string()))?;
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| RefreshError::Download(e.to_string()))?;

        let mut reader = stream.reader;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes_received: u64 = 0;
        let mut window_start = Instant::now();
        let mut window_bytes: u64 = 0;

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(RefreshError::Cancelled),
                read = reader.read(&mut buf) => read,
            };

            let n = read.map_err(|e| RefreshError::Download(e.to_string()))?;
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n])
                .await
                .map_err(|e| RefreshError::Download(e.to_string()))?;

            bytes_received += n as u64;
            window_bytes += n as u64;

            let elapsed = window_start.elapsed();
            if elapsed >= THROUGHPUT_INTERVAL {
                let bytes_per_second = (window_bytes as f64 / elapsed.as_secs_f64()) as u64;
                progress.report(TaskProgress {
                    completed: bytes_received,
                    total: total_bytes,
                });
                self.events
                    .emit(EngineEvent::Download(DownloadEvent::Progress {
                        id: job.id.to_string(),
                        bytes_received,
                        bytes_per_second,
                        total_bytes,
                    }))
                    .ok();
                window_start = Instant::now();
                window_bytes = 0;
            }
        }

        file.flush()
            .await
            .map_err(|e| RefreshError::Download(e.to_string()))?;
        drop(file);

        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        progress.report(TaskProgress {
            completed: bytes_received,
            total: total_bytes,
        });

        atomic_replace(&temp_path, &final_path)
            .await
            .map_err(|e| RefreshError::Download(e.to_string()))?;

        debug!(bytes = bytes_received, "Download stream finished");
        Ok(final_path)
    }

    /// Open the remote stream, walking the credential-prompt path on a 401.
    ///
    /// A successfully re-authenticated download is retried exactly once,
    /// not looped.
    async fn open_stream_with_auth(
        &self,
        job: &DownloadJob,
        cancel: &CancellationToken,
    ) -> Result<bridge_traits::HttpByteStream> {
        let stored = match self.credentials.get(&job.url, None).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(url = %job.url, error = %error, "Credential lookup failed");
                None
            }
        };

        let mut request = HttpRequest::get(job.url.clone()).timeout(self.open_timeout);
        if let Some(credentials) = stored {
            request = request.basic_auth(credentials);
        }

        match self.http.open_stream(request).await {
            Ok(stream) => Ok(stream),
            Err(BridgeError::AuthRequired { realm, .. }) if !cancel.is_cancelled() => {
                let Some(prompt) = &self.prompt else {
                    return Err(RefreshError::Download(
                        "authentication required".to_string(),
                    ));
                };

                match prompt.prompt(&job.url, realm.as_deref()).await {
                    Ok(Some(supplied)) => {
                        if let Err(error) = self
                            .credentials
                            .set(&job.url, realm.as_deref(), &supplied)
                            .await
                        {
                            warn!(url = %job.url, error = %error, "Storing credentials failed");
                        }
                        let retry = HttpRequest::get(job.url.clone())
                            .timeout(self.open_timeout)
                            .basic_auth(supplied);
                        Ok(self.http.open_stream(retry).await?)
                    }
                    Ok(None) => Err(RefreshError::Download(
                        "authentication cancelled".to_string(),
                    )),
                    Err(error) => Err(error.into()),
                }
            }
            Err(BridgeError::AuthRequired { .. }) => Err(RefreshError::Cancelled),
            Err(error) => Err(error.into()),
        }
    }
}

/// Replace `dest` with `temp`, falling back to remove-then-rename on
/// platforms that refuse to overwrite the destination directly.
async fn atomic_replace(temp: &Path, dest: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(temp, dest).await {
        Ok(()) => Ok(()),
        Err(_) => replace_via_remove(temp, dest).await,
    }
}

/// The fallback path: delete the destination, then rename.
async fn replace_via_remove(temp: &Path, dest: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::rename(temp, dest).await
}

/// Best-effort removal of the temporary file
async fn remove_temp(job: &DownloadJob) {
    let temp = job.temp_path();
    match tokio::fs::remove_file(&temp).await {
        Ok(()) => debug!(path = %temp.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "Failed to remove partial download"),
    }
}

/// Schedulable download; the task key is the source address so one
/// attachment is never downloaded twice concurrently.
pub struct DownloadTask {
    coordinator: Arc<DownloadCoordinator>,
    job: DownloadJob,
}

impl DownloadTask {
    pub fn new(coordinator: Arc<DownloadCoordinator>, job: DownloadJob) -> Self {
        Self { coordinator, job }
    }

    /// The queue key a download of `url` runs under
    pub fn key_for(url: &str) -> TaskKey {
        TaskKey::new(format!("download:{}", url))
    }
}

#[async_trait]
impl QueueTask for DownloadTask {
    fn key(&self) -> TaskKey {
        Self::key_for(&self.job.url)
    }

    async fn run(&self, context: TaskContext) -> std::result::Result<(), TaskError> {
        let outcome = self
            .coordinator
            .run(self.job.clone(), context.cancel.clone(), &context.progress)
            .await;

        match outcome {
            DownloadOutcome::Completed { .. } => Ok(()),
            DownloadOutcome::Cancelled => Err(TaskError::Cancelled),
            DownloadOutcome::Failed { message, .. } => Err(TaskError::Failed(message)),
        }
    }
}
