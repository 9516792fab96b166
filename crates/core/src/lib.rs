//! Core types and shared functionality for shelf.
//!
//! This crate provides:
//! - Response cache and pending-action queue with SQLite backend
//! - Unified error types
//! - Configuration structures
//! - Clock abstraction

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;

pub use cache::{ActionState, CacheDb, CacheEntry, CacheKey, GenerationKind, PendingAction};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
