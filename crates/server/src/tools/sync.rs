//! Sync queue tools: sync_status, sync_replay, sync_retry, sync_discard.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shelf_client::Engine;
use shelf_core::{ActionState, PendingAction};

use super::json_result;

/// A queued action as shown to the caller. Bodies are omitted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActionSummary {
    pub id: String,
    pub method: String,
    pub url: String,
    pub created_at: i64,
    pub attempt_count: u32,
    pub state: ActionState,
    pub last_error: Option<String>,
}

impl From<PendingAction> for ActionSummary {
    fn from(action: PendingAction) -> Self {
        Self {
            id: action.id,
            method: action.method,
            url: action.url,
            created_at: action.created_at,
            attempt_count: action.attempt_count,
            state: action.state,
            last_error: action.last_error,
        }
    }
}

/// Output from the sync_status tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncStatusOutput {
    pub online: bool,
    pub version: String,
    pub replaying: bool,
    /// Every stored action in FIFO order, exhausted ones included.
    pub actions: Vec<ActionSummary>,
}

/// Implementation of the sync_status tool.
pub async fn status_impl(engine: &Engine) -> Result<CallToolResult, McpError> {
    let actions = engine.queue().all().await?.into_iter().map(ActionSummary::from).collect();

    json_result(&SyncStatusOutput {
        online: engine.is_online(),
        version: engine.active_version(),
        replaying: engine.queue().is_replaying(),
        actions,
    })
}

/// Output from the sync_replay tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncReplayOutput {
    pub attempted: usize,
    pub succeeded: usize,
    pub rejected: usize,
    pub exhausted: usize,
    pub remaining: u64,
    pub stopped_early: bool,
    pub skipped: bool,
}

/// Implementation of the sync_replay tool.
pub async fn replay_impl(engine: &Engine) -> Result<CallToolResult, McpError> {
    let report = engine.replay_all().await?;

    json_result(&SyncReplayOutput {
        attempted: report.attempted,
        succeeded: report.succeeded,
        rejected: report.rejected,
        exhausted: report.exhausted,
        remaining: report.remaining,
        stopped_early: report.stopped_early,
        skipped: report.skipped,
    })
}

/// Parameters for sync_retry and sync_discard.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActionParams {
    pub action_id: String,
}

/// Implementation of the sync_retry tool.
pub async fn retry_impl(engine: &Engine, params: ActionParams) -> Result<CallToolResult, McpError> {
    let action = engine.queue().retry(&params.action_id).await?;
    json_result(&ActionSummary::from(action))
}

/// Output from the sync_discard tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncDiscardOutput {
    pub discarded: String,
}

/// Implementation of the sync_discard tool.
pub async fn discard_impl(engine: &Engine, params: ActionParams) -> Result<CallToolResult, McpError> {
    engine.queue().discard(&params.action_id).await?;
    json_result(&SyncDiscardOutput { discarded: params.action_id })
}
