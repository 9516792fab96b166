//! http_request tool implementation.
//!
//! Sends a request through the engine, so it is routed, cached, invalidated
//! or queued exactly as an intercepted application request would be.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shelf_client::{Engine, Method, Request};
use std::collections::BTreeMap;

use super::json_result;
use crate::error::ServerError;

/// Input parameters for http_request tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HttpRequestParams {
    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Absolute URL or origin-relative path, e.g. `/api/entries`.
    pub url: String,

    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body as text.
    #[serde(default)]
    pub body: Option<String>,

    /// Treat as a top-level document navigation (enables offline fallbacks).
    #[serde(default)]
    pub navigate: bool,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for http_request tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HttpRequestOutput {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub body_bytes: usize,
    /// Where the response came from: network, cache-fresh, cache-stale, ...
    pub source: String,
}

/// Implementation of the http_request tool.
pub async fn request_impl(engine: &Engine, params: HttpRequestParams) -> Result<CallToolResult, McpError> {
    if params.url.trim().is_empty() {
        return Err(ServerError::InvalidInput("url cannot be empty".into()).into());
    }

    let method = Method::from_bytes(params.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ServerError::InvalidInput(format!("invalid method: {}", params.method)))?;

    let mut request = Request::new(method, params.url);
    request.navigate = params.navigate;
    request.headers = params.headers.into_iter().collect();
    if let Some(body) = params.body {
        request = request.with_body(body);
    }

    let response = engine.handle(request).await?;

    let output = HttpRequestOutput {
        status: response.status.as_u16(),
        body: String::from_utf8_lossy(&response.body).into_owned(),
        body_bytes: response.body.len(),
        source: response.source.as_str().to_string(),
        headers: response.headers,
    };

    json_result(&output)
}
