//! # Sync Reconciler
//!
//! Consumes batched local change events and reconciles them into minimal,
//! merged, idempotent remote calls.
//!
//! ## Pass structure
//!
//! 1. Convert each sync-relevant change into a partial record and merge it
//!    into the pending set, linearized on the single consumer task
//! 2. Obtain one auth token for the whole batch; failure aborts the pass
//!    before any call is attempted
//! 3. Partition the pending records into equivalence groups and issue one
//!    remote call per group
//! 4. Delivered records are discarded; records of a failed call stay
//!    pending and ride a future pass, so no change is silently lost

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use bridge_traits::ItemChange;
use core_runtime::events::{EngineEvent, EventBus, SyncEvent};

use crate::error::{Result, SyncError};
use crate::record::{group_records, SyncKey, SyncRecord};
use crate::remote::{RemoteSyncApi, SyncAuthenticator};

/// Outcome counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Change events that produced or updated a record
    pub records_merged: u64,
    /// Remote calls issued
    pub calls_issued: u64,
    /// Records delivered and discarded
    pub records_delivered: u64,
    /// Records whose call failed; they remain pending
    pub records_failed: u64,
}

/// Reconciles batched change events into grouped remote calls
pub struct SyncReconciler {
    remote: Arc<dyn RemoteSyncApi>,
    authenticator: Arc<dyn SyncAuthenticator>,
    events: EventBus,
    /// Pending records keyed by (item, stream); key order makes grouping
    /// deterministic
    pending: Mutex<BTreeMap<SyncKey, SyncRecord>>,
}

impl SyncReconciler {
    pub fn new(
        remote: Arc<dyn RemoteSyncApi>,
        authenticator: Arc<dyn SyncAuthenticator>,
        events: EventBus,
    ) -> Self {
        Self {
            remote,
            authenticator,
            events,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Merge records restored from disk into the pending set
    pub async fn restore_pending(&self, records: Vec<SyncRecord>) {
        let mut pending = self.pending.lock().await;
        for record in records {
            match pending.get_mut(&record.key) {
                Some(existing) => existing.merge(&record),
                None => {
                    pending.insert(record.key.clone(), record);
                }
            }
        }
        debug!(pending = pending.len(), "Restored pending sync records");
    }

    /// Snapshot of the not-yet-delivered records, for shutdown persistence
    pub async fn pending_snapshot(&self) -> Vec<SyncRecord> {
        self.pending.lock().await.values().cloned().collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Run one reconciliation pass over a delivered batch.
    ///
    /// # Errors
    ///
    /// - `SyncError::Cancelled` when cancelled between calls; undelivered
    ///   records stay pending
    /// - `SyncError::CredentialsUnavailable` / `SyncError::Connection` when
    ///   no auth token could be obtained; the pass aborts with nothing
    ///   partially applied
    #[instrument(skip(self, batch, cancel), fields(batch = batch.len()))]
    pub async fn reconcile(
        &self,
        batch: Vec<ItemChange>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileStats> {
        let mut pending = self.pending.lock().await;
        let mut stats = ReconcileStats::default();

        for change in &batch {
            if let Some(record) = SyncRecord::from_change(change) {
                stats.records_merged += 1;
                match pending.get_mut(&record.key) {
                    Some(existing) => existing.merge(&record),
                    None => {
                        pending.insert(record.key.clone(), record);
                    }
                }
            }
        }

        // Opposing events may have merged a record down to a no-op
        pending.retain(|_, record| !record.is_empty());

        if pending.is_empty() {
            return Ok(stats);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let token = match self.authenticator.authenticate().await {
            Ok(token) => token,
            Err(error) => {
                warn!(error = %error, "Could not authenticate; pass aborted");
                self.events
                    .emit(EngineEvent::Sync(SyncEvent::ConnectionError {
                        message: error.to_string(),
                    }))
                    .ok();
                return Err(error);
            }
        };

        let records: Vec<SyncRecord> = pending.values().cloned().collect();
        let groups = group_records(&records);
        debug!(records = records.len(), groups = groups.len(), "Executing grouped remote calls");

        for group in &groups {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match self.remote.edit_tags(&token, &group.to_call()).await {
                Ok(()) => {
                    for record in &group.records {
                        pending.remove(&record.key);
                    }
                    stats.calls_issued += 1;
                    stats.records_delivered += group.records.len() as u64;
                }
                Err(error) => {
                    warn!(
                        stream = %group.stream,
                        records = group.records.len(),
                        error = %error,
                        "Remote call failed; records stay pending"
                    );
                    stats.records_failed += group.records.len() as u64;
                }
            }
        }

        self.events
            .emit(EngineEvent::Sync(SyncEvent::PassCompleted {
                records_delivered: stats.records_delivered,
                calls_issued: stats.calls_issued,
                records_pending: pending.len() as u64,
            }))
            .ok();

        Ok(stats)
    }

    /// Consume batches from the event batcher until cancelled or the
    /// producer side closes.
    ///
    /// Running on a single task linearizes all record merges.
    pub async fn run(
        self: Arc<Self>,
        mut batches: mpsc::UnboundedReceiver<Vec<ItemChange>>,
        cancel: CancellationToken,
    ) {
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            match self.reconcile(batch, &cancel).await {
                Ok(stats) => {
                    debug!(
                        delivered = stats.records_delivered,
                        calls = stats.calls_issued,
                        failed = stats.records_failed,
                        "Reconciliation pass finished"
                    );
                }
                Err(SyncError::Cancelled) => break,
                Err(error) => {
                    let pending = self.pending_len().await as u64;
                    self.events
                        .emit(EngineEvent::Sync(SyncEvent::PassFailed {
                            message: error.to_string(),
                            records_pending: pending,
                        }))
                        .ok();
                }
            }
        }

        debug!("Reconciler consumer stopped");
    }
}
