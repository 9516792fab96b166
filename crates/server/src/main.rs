//! shelf server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use shelf_client::{Engine, SyncEvent};
use shelf_core::AppConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;

    tracing::info!(
        origin = %config.origin_url,
        version = %config.version,
        db = %config.db_path.display(),
        "Starting shelf server on stdio transport"
    );

    let engine = Engine::builder(config).build().await.context("building engine")?;

    match engine.start().await {
        Ok(report) => tracing::info!(version = %report.version, precached = report.precached, "cache ready"),
        Err(e) => tracing::warn!(error = %e, active = %engine.active_version(), "install failed, keeping previous cache version"),
    }

    engine.spawn_background();
    tokio::spawn(log_sync_events(engine.clone()));

    let handler = handler::ShelfServer::new(engine.clone());
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    engine.shutdown();

    Ok(())
}

/// Surface sync outcomes in the log; there is no UI attached to stdio.
async fn log_sync_events(engine: Engine) {
    let mut events = engine.subscribe();
    loop {
        match events.recv().await {
            Ok(SyncEvent::SyncSuccess { action_id }) => tracing::info!(%action_id, "SYNC_SUCCESS"),
            Ok(SyncEvent::SyncFailed { action_id, reason, exhausted }) => {
                tracing::warn!(%action_id, %reason, exhausted, "SYNC_FAILED")
            }
            Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "sync event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
