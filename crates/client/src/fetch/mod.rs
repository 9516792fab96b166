//! Origin fetch pipeline.
//!
//! The engine talks to the origin only through the [`Origin`] trait, so tests
//! can swap in a scripted origin. [`HttpOrigin`] is the reqwest-backed
//! implementation used in production.
//!
//! ### Outcome classes
//! - A response of any status is `Ok`; deciding what 4xx/5xx means is up to
//!   the caller.
//! - No response at all (connect error, timeout, truncated body) is a
//!   transient [`FetchError`], the engine's `NetworkUnavailable` condition.
//! - A response that arrived but cannot be passed through unmodified
//!   (oversized body, non-UTF-8 header value) is a [`FetchError`] that keeps
//!   the status. The origin has acted on the request, so it is never retried.
//!
//! Bodies are not decompressed: `content-encoding` and `content-length`
//! reach the caller exactly as the origin sent them.

pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::{Duration, Instant};

pub use self::url::{UrlError, canonicalize, same_origin};
pub use reqwest::{Method, StatusCode};

use shelf_core::Error;

/// Configuration for the HTTP origin.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "shelf/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,

    /// Request timeout (default: 15s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "shelf/0.1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_millis(15_000),
            max_redirects: 5,
        }
    }
}

impl From<&shelf_core::AppConfig> for FetchConfig {
    fn from(config: &shelf_core::AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// A request as sent to the origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    pub url: ::url::Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl OriginRequest {
    /// Body-less GET, used for refreshes, precaching and probes.
    pub fn get(url: ::url::Url) -> Self {
        Self { method: Method::GET, url, headers: Vec::new(), body: Bytes::new() }
    }
}

/// Response from the origin, passed through unmodified.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers in wire order
    pub headers: Vec<(String, String)>,
    /// Response body bytes
    pub body: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

/// Failure to obtain any response from the origin.
///
/// `Clone` so that coalesced waiters can share one outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("status {status}: response of {size} bytes exceeds {limit}")]
    TooLarge { status: StatusCode, size: usize, limit: usize },

    #[error("status {status}: header {name} is not valid UTF-8")]
    InvalidHeader { status: StatusCode, name: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether no response was obtained at all.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout(_))
    }

    /// Status of a response that arrived but could not be passed through.
    pub fn answered_status(&self) -> Option<StatusCode> {
        match self {
            FetchError::TooLarge { status, .. } | FetchError::InvalidHeader { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        let message = err.to_string();
        match err {
            FetchError::InvalidUrl(url) => Error::InvalidUrl(url),
            FetchError::TooLarge { status, .. } | FetchError::InvalidHeader { status, .. } => {
                Error::UnusableResponse { status: status.as_u16(), message }
            }
            FetchError::Network(_) | FetchError::Timeout(_) => Error::NetworkUnavailable(message),
        }
    }
}

impl From<UrlError> for FetchError {
    fn from(err: UrlError) -> Self {
        FetchError::InvalidUrl(err.to_string())
    }
}

/// The collaborator that actually answers requests.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse, FetchError>;
}

/// HTTP origin backed by reqwest.
pub struct HttpOrigin {
    http: Client,
    config: FetchConfig,
}

impl HttpOrigin {
    /// Create a new origin client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else if err.is_timeout() {
            FetchError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse, FetchError> {
        let start = Instant::now();

        let mut builder = self.http.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(FetchError::TooLarge { status, size: len as usize, limit: self.config.max_bytes });
        }

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| match std::str::from_utf8(value.as_bytes()) {
                Ok(value) => Ok((name.as_str().to_string(), value.to_string())),
                Err(_) => Err(FetchError::InvalidHeader { status, name: name.as_str().to_string() }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if body.len() > self.config.max_bytes {
            return Err(FetchError::TooLarge { status, size: body.len(), limit: self.config.max_bytes });
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            fetch_ms,
            bytes = body.len(),
            "origin responded"
        );

        Ok(OriginResponse { status, headers, body, fetch_ms })
    }
}
