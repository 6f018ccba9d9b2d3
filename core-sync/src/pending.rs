//! Persistence of not-yet-delivered sync records.
//!
//! Pending records are written to a JSON file on shutdown and read back on
//! startup so local changes survive a restart. The file is written to a
//! temp sibling and renamed into place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::record::SyncRecord;

#[derive(Serialize, Deserialize)]
struct PendingFile {
    saved_at: DateTime<Utc>,
    records: Vec<SyncRecord>,
}

/// Write the pending records to `path`, replacing any previous file.
pub async fn store_pending(path: &Path, records: &[SyncRecord]) -> Result<()> {
    let payload = PendingFile {
        saved_at: Utc::now(),
        records: records.to_vec(),
    };
    let contents =
        serde_json::to_vec_pretty(&payload).map_err(|e| SyncError::Persistence(e.to_string()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
    }

    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, contents)
        .await
        .map_err(|e| SyncError::Persistence(e.to_string()))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| SyncError::Persistence(e.to_string()))?;

    debug!(path = %path.display(), records = records.len(), "Stored pending sync records");
    Ok(())
}

/// Read pending records back; a missing file yields an empty set.
pub async fn load_pending(path: &Path) -> Result<Vec<SyncRecord>> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SyncError::Persistence(e.to_string())),
    };

    let payload: PendingFile =
        serde_json::from_slice(&contents).map_err(|e| SyncError::Persistence(e.to_string()))?;

    debug!(
        path = %path.display(),
        records = payload.records.len(),
        saved_at = %payload.saved_at,
        "Loaded pending sync records"
    );
    Ok(payload.records)
}
