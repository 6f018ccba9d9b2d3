//! Runtime infrastructure for the feed engine.
//!
//! - `config`: validated engine configuration
//! - `events`: typed event bus the coordinators publish on
//! - `logging`: tracing-subscriber setup

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{
    DownloadEvent, EngineEvent, EventBus, EventSeverity, ReloadEvent, SyncEvent,
    DEFAULT_EVENT_BUFFER_SIZE,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
