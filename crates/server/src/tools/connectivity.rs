//! set_connectivity tool implementation.
//!
//! Feeds the engine's online/offline signal. Going online triggers a replay
//! of queued writes when the background listener is running.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shelf_client::Engine;

use super::json_result;

/// Parameters for the set_connectivity tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetConnectivityParams {
    pub online: bool,
}

/// Output from the set_connectivity tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetConnectivityOutput {
    pub online: bool,
    pub changed: bool,
}

/// Implementation of the set_connectivity tool.
pub async fn set_impl(engine: &Engine, params: SetConnectivityParams) -> Result<CallToolResult, McpError> {
    let changed = engine.set_online(params.online);
    json_result(&SetConnectivityOutput { online: engine.is_online(), changed })
}
