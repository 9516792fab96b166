//! cache_get tool implementation.
//!
//! Looks up the cached response for a URL in the active generations.

use chrono::{DateTime, SecondsFormat};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shelf_client::Engine;

use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Absolute URL or origin-relative path of a GET request.
    pub url: String,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    pub url: String,
    pub generation: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub stored_at_ms: i64,
    /// `stored_at_ms` as RFC 3339.
    pub stored_at: Option<String>,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(engine: &Engine, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let entry = engine.lookup(&params.url).await?;

    let output = CacheGetOutput {
        url: entry.key.url.clone(),
        generation: entry.generation.clone(),
        status: entry.status,
        body: String::from_utf8_lossy(&entry.body).into_owned(),
        stored_at_ms: entry.stored_at,
        stored_at: DateTime::from_timestamp_millis(entry.stored_at).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        headers: entry.headers,
    };

    json_result(&output)
}
