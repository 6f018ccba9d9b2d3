//! Desktop implementations of the engine's platform boundaries.
//!
//! - [`ReqwestHttpClient`]: HTTP transport with retry, conditional-fetch
//!   classification, and streaming downloads
//! - [`KeyringCredentialStore`]: credential storage backed by the OS keychain

pub mod http;

#[cfg(feature = "secure-store")]
pub mod secure_store;

pub use http::ReqwestHttpClient;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringCredentialStore;
