//! Platform and collaborator boundaries for the feed engine.
//!
//! Every external dependency of the refresh/sync core is expressed here as a
//! trait: the HTTP transport, the persistent entity store, and credential
//! storage/prompting. Host applications provide implementations (see
//! `bridge-desktop` for the desktop set); the core crates depend only on
//! these traits.

pub mod credentials;
pub mod error;
pub mod http;
pub mod store;

pub use credentials::{CredentialPrompt, CredentialStore, Credentials};
pub use error::{BridgeError, Result};
pub use http::{
    HttpByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy,
};
pub use store::{
    EntityStore, FeedId, FeedResource, ItemChange, ItemId, ItemStateSnapshot, MergeStats,
    StreamId, Subscription,
};
