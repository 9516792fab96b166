//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the engine-backed implementations.
use crate::tools::{
    cache::{CacheGetParams, CachePurgeParams, get_impl, purge_impl},
    connectivity::{SetConnectivityParams, set_impl},
    http_request::{HttpRequestParams, request_impl},
    sync::{ActionParams, discard_impl, replay_impl, retry_impl, status_impl},
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use shelf_client::Engine;

/// The main MCP server handler for shelf.
#[derive(Clone)]
pub struct ShelfServer {
    engine: Engine,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl ShelfServer {
    /// Create a new server handler around a built engine.
    pub fn new(engine: Engine) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Send an HTTP request through the offline cache. GETs are served per route strategy; writes invalidate related reads, or are queued for replay when the origin is unreachable."
    )]
    async fn http_request(&self, params: Parameters<HttpRequestParams>) -> Result<CallToolResult, McpError> {
        request_impl(&self.engine, params.0).await
    }

    #[tool(description = "Show the cached response for a URL from the active cache generations.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(&self.engine, params.0).await
    }

    #[tool(description = "Evict a URL from the cache and/or purge API entries older than their TTL.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.engine, params.0).await
    }

    #[tool(description = "Connectivity state, active cache version, and every queued write with its attempt count.")]
    async fn sync_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.engine).await
    }

    #[tool(description = "Replay queued writes now, in the order they were made.")]
    async fn sync_replay(&self) -> Result<CallToolResult, McpError> {
        replay_impl(&self.engine).await
    }

    #[tool(description = "Reset an exhausted queued write so automatic replay picks it up again.")]
    async fn sync_retry(&self, params: Parameters<ActionParams>) -> Result<CallToolResult, McpError> {
        retry_impl(&self.engine, params.0).await
    }

    #[tool(description = "Drop a queued write without sending it.")]
    async fn sync_discard(&self, params: Parameters<ActionParams>) -> Result<CallToolResult, McpError> {
        discard_impl(&self.engine, params.0).await
    }

    #[tool(description = "Report the client as online or offline. Going online replays queued writes.")]
    async fn set_connectivity(&self, params: Parameters<SetConnectivityParams>) -> Result<CallToolResult, McpError> {
        set_impl(&self.engine, params.0).await
    }
}

impl ServerHandler for ShelfServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "shelf".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Offline cache and sync engine in front of an origin HTTP API. Use http_request for traffic, sync_* to manage queued writes."
                    .into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
