//! Cache validators for conditional fetches.
//!
//! A validator is the pair of opaque tokens a server handed out with the
//! last fetched copy of a resource. Attaching them to the next request lets
//! the server answer "not modified" cheaply. Validators are read and written
//! only by the reload coordinator and persist between runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RefreshError, Result};
use bridge_traits::FeedId;

/// Stored conditional-fetch tokens for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidator {
    /// Address of the resource the tokens belong to
    pub url: String,
    /// Entity tag from the last fetch
    pub etag: Option<String>,
    /// Last-modified stamp from the last fetch
    pub last_modified: Option<String>,
}

impl CacheValidator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            etag: None,
            last_modified: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, stamp: impl Into<String>) -> Self {
        self.last_modified = Some(stamp.into());
        self
    }

    /// Whether the validator carries no usable token
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Persistent storage for cache validators
#[async_trait]
pub trait ValidatorStore: Send + Sync {
    async fn load(&self, feed: &FeedId) -> Result<Option<CacheValidator>>;

    async fn save(&self, feed: &FeedId, validator: CacheValidator) -> Result<()>;

    async fn delete(&self, feed: &FeedId) -> Result<()>;
}

/// In-memory validator store, used in tests and as a cache-less fallback
#[derive(Default)]
pub struct MemoryValidatorStore {
    map: Mutex<HashMap<String, CacheValidator>>,
}

impl MemoryValidatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidatorStore for MemoryValidatorStore {
    async fn load(&self, feed: &FeedId) -> Result<Option<CacheValidator>> {
        Ok(self.map.lock().await.get(feed.as_str()).cloned())
    }

    async fn save(&self, feed: &FeedId, validator: CacheValidator) -> Result<()> {
        self.map
            .lock()
            .await
            .insert(feed.as_str().to_string(), validator);
        Ok(())
    }

    async fn delete(&self, feed: &FeedId) -> Result<()> {
        self.map.lock().await.remove(feed.as_str());
        Ok(())
    }
}

/// Validator store persisted as a single JSON file.
///
/// The whole map is rewritten on every change; the file is written to a
/// sibling temp path and renamed into place so a crash never leaves a
/// truncated map behind.
pub struct JsonFileValidatorStore {
    path: PathBuf,
    map: Mutex<HashMap<String, CacheValidator>>,
}

impl JsonFileValidatorStore {
    /// Open the store, reading any previously persisted map.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = match tokio::fs::read(&path).await {
            Ok(contents) => serde_json::from_slice(&contents)
                .map_err(|e| RefreshError::Persistence(format!("Corrupt validator map: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(RefreshError::Persistence(e.to_string())),
        };

        debug!(path = %path.display(), entries = map.len(), "Opened validator store");
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    async fn persist(&self, map: &HashMap<String, CacheValidator>) -> Result<()> {
        let payload = serde_json::to_vec_pretty(map)
            .map_err(|e| RefreshError::Persistence(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RefreshError::Persistence(e.to_string()))?;
        }

        let temp = temp_sibling(&self.path);
        tokio::fs::write(&temp, payload)
            .await
            .map_err(|e| RefreshError::Persistence(e.to_string()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| RefreshError::Persistence(e.to_string()))?;

        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "validators.json".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl ValidatorStore for JsonFileValidatorStore {
    async fn load(&self, feed: &FeedId) -> Result<Option<CacheValidator>> {
        Ok(self.map.lock().await.get(feed.as_str()).cloned())
    }

    async fn save(&self, feed: &FeedId, validator: CacheValidator) -> Result<()> {
        let mut map = self.map.lock().await;
        map.insert(feed.as_str().to_string(), validator);
        self.persist(&map).await
    }

    async fn delete(&self, feed: &FeedId) -> Result<()> {
        let mut map = self.map.lock().await;
        if map.remove(feed.as_str()).is_some() {
            self.persist(&map).await?;
        }
        Ok(())
    }
}
