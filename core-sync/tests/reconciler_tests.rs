//! Integration tests for the sync reconciler
//!
//! These tests verify the reconciliation contract:
//! - events for the same key merge before delivery
//! - grouping yields one remote call per (stream, shape) pair
//! - authentication failure aborts the pass with nothing applied
//! - failed calls leave their records pending for the next pass
//! - deleted items are synced as read

use async_trait::async_trait;
use bridge_traits::{ItemChange, ItemId, ItemStateSnapshot, StreamId};
use core_runtime::events::EventBus;
use core_sync::{
    AuthToken, RemoteEditCall, RemoteSyncApi, SyncAuthenticator, SyncError, SyncReconciler,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock remote boundary
// ============================================================================

#[derive(Default)]
struct RecordingRemote {
    calls: Mutex<Vec<RemoteEditCall>>,
    /// Number of upcoming calls that should fail
    fail_next: AtomicUsize,
}

impl RecordingRemote {
    async fn calls(&self) -> Vec<RemoteEditCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RemoteSyncApi for RecordingRemote {
    async fn edit_tags(
        &self,
        _token: &AuthToken,
        call: &RemoteEditCall,
    ) -> core_sync::Result<()> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Remote("service unavailable".to_string()));
        }
        self.calls.lock().await.push(call.clone());
        Ok(())
    }
}

struct StaticAuthenticator {
    available: AtomicBool,
    calls: AtomicUsize,
}

impl StaticAuthenticator {
    fn available() -> Self {
        Self {
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    fn unavailable() -> Self {
        Self {
            available: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SyncAuthenticator for StaticAuthenticator {
    async fn authenticate(&self) -> core_sync::Result<AuthToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(AuthToken::new("token"))
        } else {
            Err(SyncError::CredentialsUnavailable)
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn snapshot(read: bool, starred: bool, hidden: bool) -> ItemStateSnapshot {
    ItemStateSnapshot {
        read,
        starred,
        hidden,
        labels: Default::default(),
    }
}

fn read_event(item: &str, stream: &str) -> ItemChange {
    ItemChange {
        item: ItemId::new(item),
        stream: StreamId::new(stream),
        synced: true,
        old: snapshot(false, false, false),
        new: snapshot(true, false, false),
    }
}

fn unread_event(item: &str, stream: &str) -> ItemChange {
    ItemChange {
        item: ItemId::new(item),
        stream: StreamId::new(stream),
        synced: true,
        old: snapshot(true, false, false),
        new: snapshot(false, false, false),
    }
}

fn star_event(item: &str, stream: &str) -> ItemChange {
    ItemChange {
        item: ItemId::new(item),
        stream: StreamId::new(stream),
        synced: true,
        old: snapshot(false, false, false),
        new: snapshot(false, true, false),
    }
}

fn reconciler(
    remote: Arc<RecordingRemote>,
    authenticator: Arc<StaticAuthenticator>,
) -> SyncReconciler {
    SyncReconciler::new(remote, authenticator, EventBus::new(16))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_equivalent_records_share_one_remote_call() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = reconciler(Arc::clone(&remote), Arc::clone(&auth));

    // Items 1 and 2 marked read, item 3 starred, all in stream S
    let batch = vec![
        read_event("1", "S"),
        read_event("2", "S"),
        star_event("3", "S"),
    ];

    let stats = reconciler
        .reconcile(batch, &CancellationToken::new())
        .await
        .unwrap();

    // Exactly two calls, not three
    assert_eq!(stats.calls_issued, 2);
    assert_eq!(stats.records_delivered, 3);

    let calls = remote.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].items,
        vec![ItemId::new("1"), ItemId::new("2")]
    );
    assert_eq!(calls[0].add, vec!["read".to_string()]);
    assert_eq!(calls[1].items, vec![ItemId::new("3")]);
    assert_eq!(calls[1].add, vec!["starred".to_string()]);

    // One token served the whole pass
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reconciler.pending_len().await, 0);
}

#[tokio::test]
async fn test_opposing_events_cancel_before_delivery() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = reconciler(Arc::clone(&remote), auth);

    let batch = vec![read_event("1", "S"), unread_event("1", "S")];
    let stats = reconciler
        .reconcile(batch, &CancellationToken::new())
        .await
        .unwrap();

    // mark-read followed by mark-unread collapses to mark-unread alone
    assert_eq!(stats.calls_issued, 1);
    let calls = remote.calls().await;
    assert!(calls[0].add.is_empty());
    assert_eq!(calls[0].remove, vec!["read".to_string()]);
}

#[tokio::test]
async fn test_unsynced_events_are_dropped() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = reconciler(Arc::clone(&remote), Arc::clone(&auth));

    let mut event = read_event("1", "S");
    event.synced = false;

    let stats = reconciler
        .reconcile(vec![event], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.records_merged, 0);
    assert_eq!(stats.calls_issued, 0);
    // An empty pass never contacts the authenticator
    assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deleted_item_syncs_as_read() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = reconciler(Arc::clone(&remote), auth);

    let deletion = ItemChange {
        item: ItemId::new("1"),
        stream: StreamId::new("S"),
        synced: true,
        old: snapshot(false, true, false),
        new: snapshot(false, true, true),
    };

    reconciler
        .reconcile(vec![deletion], &CancellationToken::new())
        .await
        .unwrap();

    let calls = remote.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].add, vec!["read".to_string()]);
    assert_eq!(calls[0].remove, vec!["starred".to_string()]);
}

#[tokio::test]
async fn test_auth_failure_aborts_pass_with_nothing_applied() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::unavailable());
    let reconciler = reconciler(Arc::clone(&remote), auth);

    let error = reconciler
        .reconcile(vec![read_event("1", "S")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::CredentialsUnavailable));
    assert!(remote.calls().await.is_empty());
    // The record survived for the next pass
    assert_eq!(reconciler.pending_len().await, 1);
}

#[tokio::test]
async fn test_failed_call_leaves_records_pending_for_retry() {
    let remote = Arc::new(RecordingRemote::default());
    remote.fail_next.store(1, Ordering::SeqCst);
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = reconciler(Arc::clone(&remote), auth);

    let stats = reconciler
        .reconcile(vec![read_event("1", "S")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.records_delivered, 0);
    assert_eq!(reconciler.pending_len().await, 1);

    // The next pass retries the same record and succeeds
    let stats = reconciler
        .reconcile(Vec::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.records_delivered, 1);
    assert_eq!(reconciler.pending_len().await, 0);
    assert_eq!(remote.calls().await.len(), 1);
}

#[tokio::test]
async fn test_restored_records_ride_the_next_pass() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = reconciler(Arc::clone(&remote), auth);

    let mut record = core_sync::SyncRecord::new(core_sync::SyncKey {
        item: ItemId::new("restored"),
        stream: StreamId::new("S"),
    });
    record.set_read();
    reconciler.restore_pending(vec![record]).await;

    let stats = reconciler
        .reconcile(Vec::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.records_delivered, 1);
    assert_eq!(
        remote.calls().await[0].items,
        vec![ItemId::new("restored")]
    );
}

#[tokio::test]
async fn test_consumer_loop_drains_batches() {
    let remote = Arc::new(RecordingRemote::default());
    let auth = Arc::new(StaticAuthenticator::available());
    let reconciler = Arc::new(reconciler(Arc::clone(&remote), auth));

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let consumer = tokio::spawn(Arc::clone(&reconciler).run(rx, cancel.clone()));

    tx.send(vec![read_event("1", "S")]).unwrap();
    tx.send(vec![star_event("2", "S")]).unwrap();
    drop(tx);

    consumer.await.unwrap();
    assert_eq!(remote.calls().await.len(), 2);
    assert_eq!(reconciler.pending_len().await, 0);
}
