//! SQLite-backed storage for cached responses and pending actions.
//!
//! This module provides persistent storage using SQLite with async access
//! via tokio-rusqlite. All statements run on the connection's single
//! background thread, which serializes every write. It supports:
//!
//! - Content-addressed keys using SHA-256 hashing
//! - Named cache generations with whole-generation eviction
//! - A durable FIFO of mutations awaiting replay
//! - Automatic schema migrations

pub mod connection;
pub mod entries;
pub mod generations;
pub mod key;
pub mod migrations;
pub mod pending;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::{CacheEntry, EntrySummary};
pub use generations::GenerationKind;
pub use key::CacheKey;
pub use pending::{ActionState, PendingAction};
