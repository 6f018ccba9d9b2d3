//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for the refresh and sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent feed reloads
    pub reload_concurrency: usize,

    /// Maximum concurrent attachment downloads
    pub download_concurrency: usize,

    /// Quiet period the event batcher waits after items arrive
    pub quiet_period: Duration,

    /// Timeout for a single feed fetch
    pub fetch_timeout: Duration,

    /// Timeout for opening a download stream
    pub download_timeout: Duration,

    /// Directory downloads are placed in
    pub download_dir: PathBuf,

    /// Directory for the engine's own persisted artifacts
    /// (cache validators, pending sync records)
    pub data_dir: PathBuf,

    /// Base address of the remote sync service; `None` disables
    /// reconciliation
    pub sync_endpoint: Option<String>,

    /// Buffer size of the engine event bus
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reload_concurrency: 10,
            download_concurrency: 3,
            quiet_period: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(60),
            download_dir: PathBuf::from("downloads"),
            data_dir: PathBuf::from("data"),
            sync_endpoint: None,
            event_buffer_size: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_reload_concurrency(mut self, bound: usize) -> Self {
        self.reload_concurrency = bound;
        self
    }

    pub fn with_download_concurrency(mut self, bound: usize) -> Self {
        self.download_concurrency = bound;
        self
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_sync_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sync_endpoint = Some(endpoint.into());
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when a queue bound is zero, the quiet period is
    /// zero, or the sync endpoint is not an absolute URL.
    pub fn validate(&self) -> Result<()> {
        if self.reload_concurrency == 0 {
            return Err(Error::Config("reload_concurrency must be positive".into()));
        }
        if self.download_concurrency == 0 {
            return Err(Error::Config(
                "download_concurrency must be positive".into(),
            ));
        }
        if self.quiet_period.is_zero() {
            return Err(Error::Config("quiet_period must be positive".into()));
        }
        if self.event_buffer_size == 0 {
            return Err(Error::Config("event_buffer_size must be positive".into()));
        }
        if let Some(endpoint) = &self.sync_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Error::Config(format!(
                    "sync_endpoint must be an absolute URL: {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}
