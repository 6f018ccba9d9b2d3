//! # Feed Refresh Module
//!
//! Orchestrates conditional feed refreshes and attachment downloads.
//!
//! ## Components
//!
//! - **Cache Validators** (`validator`): persisted ETag/Last-Modified pairs
//!   driving conditional fetches
//! - **Conditional Fetcher** (`fetcher`): network fetch with outcome
//!   classification (unchanged / fetched / auth required / failed)
//! - **Reload Coordinator** (`reload`): one refresh cycle per feed with
//!   error-flag bookkeeping, write-queue persistence, and credential
//!   recovery
//! - **Download Coordinator** (`download`): streamed downloads with
//!   progress, atomic completion, and cleanup guarantees

pub mod download;
pub mod error;
pub mod fetcher;
pub mod reload;
pub mod validator;

pub use download::{
    DownloadCoordinator, DownloadId, DownloadJob, DownloadOutcome, DownloadTask,
};
pub use error::{RefreshError, Result};
pub use fetcher::{ConditionalFetcher, FetchOutcome, FetchedResource};
pub use reload::{ReloadCoordinator, ReloadOutcome, ReloadTask};
pub use validator::{
    CacheValidator, JsonFileValidatorStore, MemoryValidatorStore, ValidatorStore,
};
