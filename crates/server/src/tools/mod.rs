//! MCP tool implementations.
//!
//! This module contains all tools exposed by the shelf server. Each tool
//! takes the shared [`Engine`](shelf_client::Engine) and returns its output
//! as pretty-printed JSON text.

pub mod cache;
pub mod connectivity;
pub mod http_request;
pub mod sync;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ServerError;

/// Serialize a tool output into a successful result.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| ServerError::Serialize(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use bytes::Bytes;
    use rmcp::model::CallToolResult;
    use shelf_client::{Engine, FetchError, Origin, OriginRequest, OriginResponse, StatusCode};
    use shelf_core::{AppConfig, CacheDb};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Origin answering every request with `200 {"ok":true}` unless switched off.
    pub struct StubOrigin {
        pub online: AtomicBool,
    }

    #[async_trait]
    impl Origin for StubOrigin {
        async fn fetch(&self, _request: &OriginRequest) -> Result<OriginResponse, FetchError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(FetchError::Network("unreachable".into()));
            }
            Ok(OriginResponse {
                status: StatusCode::OK,
                headers: vec![("content-type".into(), "application/json".into())],
                body: Bytes::from_static(br#"{"ok":true}"#),
                fetch_ms: 1,
            })
        }
    }

    pub async fn engine() -> (Engine, Arc<StubOrigin>) {
        let origin = Arc::new(StubOrigin { online: AtomicBool::new(true) });
        let config = AppConfig { origin_url: "https://app.test".into(), ..Default::default() };
        let engine = Engine::builder(config)
            .db(CacheDb::open_in_memory().await.unwrap())
            .origin(origin.clone())
            .build()
            .await
            .unwrap();
        (engine, origin)
    }

    /// Decode the JSON text of a tool result.
    pub fn output<T: serde::de::DeserializeOwned>(result: &CallToolResult) -> T {
        let content = serde_json::to_value(&result.content[0]).unwrap();
        let text = content.get("text").and_then(|v| v.as_str()).expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
