//! Service façade for the feed refresh and remote sync engine.
//!
//! Host applications construct a [`FeedEngine`] once at startup from their
//! bridge implementations (HTTP transport, entity store, credential
//! storage/prompt) and an [`EngineConfig`], then drive it through its
//! handle. See `bridge-desktop` for the desktop bridge set.

pub mod engine;
pub mod error;

pub use engine::{EngineDependencies, FeedEngine};
pub use error::{EngineError, Result};

pub use core_runtime::EngineConfig;
