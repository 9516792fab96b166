//! cache_purge tool implementation.
//!
//! Evicts a single URL from the active generations, or drops API entries
//! older than the configured TTL.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shelf_client::Engine;

use crate::error::ServerError;
use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Evict the cached response for this URL.
    pub url: Option<String>,

    /// Purge API entries older than the API TTL.
    #[serde(default)]
    pub expired: bool,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(engine: &Engine, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    if params.url.is_none() && !params.expired {
        return Err(ServerError::InvalidInput("At least one of url or expired must be specified".to_string()).into());
    }

    let mut deleted = 0u64;

    if let Some(url) = &params.url {
        deleted += engine.evict(url).await?;
    }

    if params.expired {
        deleted += engine.purge_expired().await?;
    }

    json_result(&CachePurgeOutput { deleted })
}
