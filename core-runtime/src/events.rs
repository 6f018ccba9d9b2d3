//! # Event Bus System
//!
//! Event-driven communication between engine modules using
//! `tokio::sync::broadcast`. Coordinators emit typed events; any number of
//! subscribers (typically the host GUI) listen independently.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, EngineEvent, ReloadEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(EngineEvent::Reload(ReloadEvent::Unchanged {
//!         feed: "feed-1".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! Subscribers that fall behind receive `RecvError::Lagged(n)` and can keep
//! receiving newer events; `RecvError::Closed` signals shutdown.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    /// Feed refresh events
    Reload(ReloadEvent),
    /// Attachment download events
    Download(DownloadEvent),
    /// Remote synchronization events
    Sync(SyncEvent),
}

impl EngineEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            EngineEvent::Reload(e) => e.description(),
            EngineEvent::Download(e) => e.description(),
            EngineEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            EngineEvent::Reload(ReloadEvent::Failed { .. }) => EventSeverity::Error,
            EngineEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            EngineEvent::Sync(SyncEvent::PassFailed { .. }) => EventSeverity::Error,
            EngineEvent::Sync(SyncEvent::ConnectionError { .. }) => EventSeverity::Error,
            EngineEvent::Reload(ReloadEvent::Merged { .. }) => EventSeverity::Info,
            EngineEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted during a feed refresh cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReloadEvent {
    /// Refresh cycle started for a feed.
    Started {
        /// The feed being refreshed.
        feed: String,
    },
    /// The server reported the feed content unchanged.
    Unchanged {
        /// The feed that was checked.
        feed: String,
    },
    /// New content was merged into persisted state.
    Merged {
        /// The feed that was refreshed.
        feed: String,
        /// Number of new items.
        items_added: u64,
        /// Number of updated items.
        items_updated: u64,
    },
    /// Authentication is pending for the feed; not a terminal failure.
    AuthPending {
        /// The feed awaiting credentials.
        feed: String,
    },
    /// The refresh failed; the feed carries a visible error indicator.
    Failed {
        /// The feed that failed.
        feed: String,
        /// Human-readable message including the feed name and address.
        message: String,
    },
}

impl ReloadEvent {
    fn description(&self) -> &str {
        match self {
            ReloadEvent::Started { .. } => "Feed refresh started",
            ReloadEvent::Unchanged { .. } => "Feed unchanged",
            ReloadEvent::Merged { .. } => "Feed content merged",
            ReloadEvent::AuthPending { .. } => "Feed authentication pending",
            ReloadEvent::Failed { .. } => "Feed refresh failed",
        }
    }
}

/// Events emitted during an attachment download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Download started.
    Started {
        /// Download job identifier.
        id: String,
        /// Source address.
        url: String,
        /// Total size in bytes when the server announced one.
        total_bytes: Option<u64>,
    },
    /// Periodic progress update, emitted at most once per second.
    Progress {
        /// Download job identifier.
        id: String,
        /// Bytes received so far.
        bytes_received: u64,
        /// Current throughput sample.
        bytes_per_second: u64,
        /// Total size in bytes when known.
        total_bytes: Option<u64>,
    },
    /// Download finished and the destination file is in place.
    Completed {
        /// Download job identifier.
        id: String,
        /// Final destination path.
        path: String,
    },
    /// Download failed; the job can be retried verbatim.
    Failed {
        /// Download job identifier.
        id: String,
        /// Human-readable failure message.
        message: String,
    },
    /// Download was cancelled; no partial output remains.
    Cancelled {
        /// Download job identifier.
        id: String,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Cancelled { .. } => "Download cancelled",
        }
    }
}

/// Events emitted by the sync reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A reconciliation pass delivered its records.
    PassCompleted {
        /// Records delivered to the remote side.
        records_delivered: u64,
        /// Remote calls issued for those records.
        calls_issued: u64,
        /// Records left pending for a future pass.
        records_pending: u64,
    },
    /// A reconciliation pass failed; nothing was applied.
    PassFailed {
        /// Human-readable failure message.
        message: String,
        /// Records left pending for a future pass.
        records_pending: u64,
    },
    /// Authentication for the sync service could not be obtained.
    ConnectionError {
        /// Human-readable failure message.
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::PassCompleted { .. } => "Sync pass completed",
            SyncEvent::PassFailed { .. } => "Sync pass failed",
            SyncEvent::ConnectionError { .. } => "Sync connection error",
        }
    }
}

/// Central broadcast channel for engine events.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create an event bus with the given buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns an error only when no subscriber exists, which callers may
    /// ignore.
    pub fn emit(&self, event: EngineEvent) -> Result<usize, SendError<EngineEvent>> {
        self.sender.send(event)
    }

    /// Create a new independent subscription.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::Reload(ReloadEvent::Unchanged {
            feed: "feed-1".to_string(),
        }))
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            EngineEvent::Reload(ReloadEvent::Unchanged {
                feed: "feed-1".to_string()
            })
        );
    }

    #[test]
    fn test_severity() {
        let failed = EngineEvent::Reload(ReloadEvent::Failed {
            feed: "f".to_string(),
            message: "m".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let progress = EngineEvent::Download(DownloadEvent::Progress {
            id: "d".to_string(),
            bytes_received: 1,
            bytes_per_second: 1,
            total_bytes: None,
        });
        assert_eq!(progress.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_emit_without_subscribers_is_recoverable() {
        let bus = EventBus::new(10);
        assert!(bus
            .emit(EngineEvent::Sync(SyncEvent::ConnectionError {
                message: "no credentials".to_string(),
            }))
            .is_err());
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event = EngineEvent::Download(DownloadEvent::Started {
            id: "d-1".to_string(),
            url: "https://example.com/episode.mp3".to_string(),
            total_bytes: Some(1024),
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
