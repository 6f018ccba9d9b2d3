//! # Remote Sync Module
//!
//! Reconciles batched local state changes into minimal remote API calls.
//!
//! ## Components
//!
//! - **Sync Records** (`record`): normalized, mergeable change accumulators
//!   keyed by (item, stream), with stable equivalence grouping
//! - **Remote Client** (`remote`): form-encoded edit-tags call and the
//!   once-per-pass authenticator
//! - **Reconciler** (`reconciler`): batch consumption, all-or-nothing auth,
//!   per-group delivery with pending carry-over
//! - **Pending Store** (`pending`): JSON persistence of undelivered records
//!   across restarts

pub mod error;
pub mod pending;
pub mod reconciler;
pub mod record;
pub mod remote;

pub use error::{Result, SyncError};
pub use pending::{load_pending, store_pending};
pub use reconciler::{ReconcileStats, SyncReconciler};
pub use record::{group_records, EquivalenceGroup, GroupShape, SyncKey, SyncRecord};
pub use remote::{
    AuthToken, PasswordAuthenticator, RemoteEditCall, RemoteSyncApi, RemoteSyncClient,
    SyncAuthenticator, TAG_READ, TAG_STARRED,
};
