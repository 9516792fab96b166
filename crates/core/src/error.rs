//! Unified error types for shelf.
//!
//! The first four variants are the engine's error taxonomy; the rest cover
//! storage, input and lifecycle failures.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the shelf engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No response could be obtained from the origin.
    #[error("NETWORK_UNAVAILABLE: {0}")]
    NetworkUnavailable(String),

    /// The origin answered with a definitive 4xx/5xx.
    #[error("ORIGIN_REJECTED: status {status}: {message}")]
    OriginRejected { status: u16, message: String },

    /// No cache entry found for the given key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// A pending action exceeded its retry ceiling.
    #[error("REPLAY_EXHAUSTED: action {action_id} after {attempts} attempts")]
    ReplayExhausted { action_id: String, attempts: u32 },

    /// The origin answered, but the response cannot be passed through
    /// (oversized body, undecodable header). Not transient.
    #[error("UNUSABLE_RESPONSE: status {status}: {message}")]
    UnusableResponse { status: u16, message: String },

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt row: {0}")]
    Corrupt(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Precaching a new generation failed; the previous version stays active.
    #[error("INSTALL_FAILED: {0}")]
    InstallFailed(String),

    /// Referenced pending action does not exist.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether the failure is transient connectivity loss.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::NetworkUnavailable(_) => -32000,
            Error::CacheMiss(_) => -32001,
            Error::Database(_) | Error::MigrationFailed(_) | Error::Corrupt(_) => -32002,
            Error::InvalidUrl(_) => -32003,
            Error::OriginRejected { .. } => -32004,
            Error::ReplayExhausted { .. } => -32005,
            Error::InstallFailed(_) => -32006,
            Error::NotFound(_) => -32007,
            Error::UnusableResponse { .. } => -32008,
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
