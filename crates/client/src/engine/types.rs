//! Request and response values exchanged with the host.

use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use shelf_core::{CacheEntry, Error};

use crate::fetch::OriginResponse;

/// Header set on every response the engine synthesizes or serves from cache.
pub const SOURCE_HEADER: &str = "x-shelf-source";

/// An inbound request from the host.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute URL or origin-relative path.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Top-level document navigation (eligible for the offline document).
    pub navigate: bool,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: Bytes::new(), navigate: false }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn navigation(url: impl Into<String>) -> Self {
        Self { navigate: true, ..Self::get(url) }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh from the origin.
    Network,
    /// Cached and within its TTL.
    CacheFresh,
    /// Cached past its TTL; a background refresh was started.
    CacheStale,
    /// Network failed; served the cached copy.
    CacheFallback,
    /// Network failed on a navigation; served the precached app shell.
    AppShell,
    /// Nothing cached; synthesized offline document.
    OfflineDocument,
    /// Mutation could not reach the origin and was queued for replay.
    Queued,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::CacheFresh => "cache-fresh",
            ResponseSource::CacheStale => "cache-stale",
            ResponseSource::CacheFallback => "cache-fallback",
            ResponseSource::AppShell => "app-shell",
            ResponseSource::OfflineDocument => "offline-document",
            ResponseSource::Queued => "queued",
        }
    }
}

/// A response handed back to the host.
///
/// Status, headers and body are exactly what the origin sent (or what was
/// stored from it); `source` travels out of band.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    pub(crate) fn from_origin(response: OriginResponse) -> Self {
        Self { status: response.status, headers: response.headers, body: response.body, source: ResponseSource::Network }
    }

    pub(crate) fn from_entry(entry: CacheEntry, source: ResponseSource) -> Result<Self, Error> {
        let status = StatusCode::from_u16(entry.status).map_err(|e| Error::Corrupt(e.to_string()))?;
        Ok(Self { status, headers: entry.headers, body: Bytes::from(entry.body), source })
    }

    pub(crate) fn offline_document(html: Bytes) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers: vec![
                ("content-type".into(), "text/html; charset=utf-8".into()),
                ("cache-control".into(), "no-store".into()),
                (SOURCE_HEADER.into(), ResponseSource::OfflineDocument.as_str().into()),
            ],
            body: html,
            source: ResponseSource::OfflineDocument,
        }
    }

    pub(crate) fn queued(action_id: &str) -> Self {
        let body = serde_json::json!({ "queued": true, "action_id": action_id }).to_string();
        Self {
            status: StatusCode::ACCEPTED,
            headers: vec![
                ("content-type".into(), "application/json".into()),
                (SOURCE_HEADER.into(), ResponseSource::Queued.as_str().into()),
            ],
            body: Bytes::from(body),
            source: ResponseSource::Queued,
        }
    }

    /// First header value with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the response came from the local store rather than the origin.
    pub fn is_from_cache(&self) -> bool {
        matches!(
            self.source,
            ResponseSource::CacheFresh | ResponseSource::CacheStale | ResponseSource::CacheFallback | ResponseSource::AppShell
        )
    }

    /// Convert a 4xx/5xx into `Error::OriginRejected`.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(Error::OriginRejected {
                status: self.status.as_u16(),
                message: String::from_utf8_lossy(&self.body).chars().take(200).collect(),
            });
        }
        Ok(self)
    }
}
