//! Conditional feed fetching.
//!
//! Performs a network fetch with previously stored cache validators attached
//! and classifies the result: unchanged, fetched with new content, auth
//! required, or failed.

use bridge_traits::{BridgeError, Credentials, HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RefreshError, Result};
use crate::validator::CacheValidator;

/// Classification of a conditional fetch
#[derive(Debug)]
pub enum FetchOutcome {
    /// The server reported the stored validators still current
    Unchanged,
    /// New content was returned
    Fetched(FetchedResource),
    /// The server demands credentials
    AuthRequired { realm: Option<String> },
}

/// Content and validators returned by a successful fetch
#[derive(Debug)]
pub struct FetchedResource {
    pub body: Bytes,
    /// Fresh validators, when the server supplied any
    pub validator: Option<CacheValidator>,
}

/// Performs conditional fetches over the HTTP boundary
pub struct ConditionalFetcher {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl ConditionalFetcher {
    pub fn new(http: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Fetch `url`, attaching the stored validator tokens when present.
    ///
    /// Cancellation is observed before and during the network call; a
    /// cancelled fetch returns `RefreshError::Cancelled` without any side
    /// effects.
    pub async fn fetch(
        &self,
        url: &str,
        validator: Option<&CacheValidator>,
        credentials: Option<Credentials>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let mut request = HttpRequest::get(url).timeout(self.timeout);
        if let Some(validator) = validator {
            if let Some(etag) = &validator.etag {
                request = request.if_none_match(etag.clone());
            }
            if let Some(stamp) = &validator.last_modified {
                request = request.if_modified_since(stamp.clone());
            }
        }
        if let Some(credentials) = credentials {
            request = request.basic_auth(credentials);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RefreshError::Cancelled),
            response = self.http.execute(request) => response,
        };

        match response {
            Ok(response) => {
                let validator = validator_from_response(url, &response);
                debug!(
                    url = url,
                    status = response.status,
                    bytes = response.body.len(),
                    has_validator = validator.is_some(),
                    "Fetched feed content"
                );
                Ok(FetchOutcome::Fetched(FetchedResource {
                    body: response.body,
                    validator,
                }))
            }
            Err(BridgeError::NotModified) => {
                debug!(url = url, "Feed unchanged");
                Ok(FetchOutcome::Unchanged)
            }
            Err(BridgeError::AuthRequired { realm, .. }) => {
                debug!(url = url, realm = ?realm, "Feed requires authentication");
                Ok(FetchOutcome::AuthRequired { realm })
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Build a validator from the response headers, if the server sent any.
fn validator_from_response(url: &str, response: &HttpResponse) -> Option<CacheValidator> {
    let mut validator = CacheValidator::new(url);
    if let Some(etag) = response.etag() {
        validator.etag = Some(etag.to_string());
    }
    if let Some(stamp) = response.last_modified() {
        validator.last_modified = Some(stamp.to_string());
    }

    if validator.is_empty() {
        None
    } else {
        Some(validator)
    }
}
