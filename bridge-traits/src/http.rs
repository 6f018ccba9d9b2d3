//! HTTP Transport Abstraction
//!
//! Provides async HTTP operations with conditional-fetch headers, basic
//! authentication, retry policies, and streaming downloads.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::error::Result;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

/// HTTP request builder
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub credentials: Option<Credentials>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            credentials: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Attach a stored entity tag for a conditional fetch.
    pub fn if_none_match(self, etag: impl Into<String>) -> Self {
        self.header("if-none-match", etag)
    }

    /// Attach a stored last-modified stamp for a conditional fetch.
    pub fn if_modified_since(self, stamp: impl Into<String>) -> Self {
        self.header("if-modified-since", stamp)
    }

    /// Attach credentials; the transport applies them as HTTP basic auth.
    pub fn basic_auth(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set a form-encoded POST body from key/value pairs.
    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key, value);
        }
        self.body = Some(Bytes::from(serializer.finish()));
        self.headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// HTTP response
///
/// Header names are lowercased by the transport.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// The entity tag returned by the server, if any
    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    /// The last-modified stamp returned by the server, if any
    pub fn last_modified(&self) -> Option<&str> {
        self.header("last-modified")
    }

    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| {
            crate::error::BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e))
        })
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An open remote byte stream.
///
/// `content_length` is `None` when the server did not announce a length;
/// consumers must treat such downloads as indeterminate.
pub struct HttpByteStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

/// Async HTTP client trait
///
/// Implementations classify terminal response statuses into the bridge error
/// taxonomy instead of surfacing raw status codes:
/// - `304 Not Modified` becomes [`BridgeError::NotModified`]
/// - `401 Unauthorized` becomes [`BridgeError::AuthRequired`] with the parsed
///   realm when the server supplied one
/// - transport failures and other non-success statuses become
///   [`BridgeError::ConnectionFailed`]
///
/// [`BridgeError::NotModified`]: crate::error::BridgeError::NotModified
/// [`BridgeError::AuthRequired`]: crate::error::BridgeError::AuthRequired
/// [`BridgeError::ConnectionFailed`]: crate::error::BridgeError::ConnectionFailed
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request and buffer the full response body
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute an HTTP request with a custom retry policy
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let _ = policy;
        self.execute(request).await
    }

    /// Open a remote resource as a stream of bytes.
    ///
    /// This is used for large payloads that should not be loaded entirely
    /// into memory (attachment downloads).
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpByteStream>;
}
