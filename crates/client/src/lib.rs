//! Client side of shelf.
//!
//! This crate provides the origin fetch pipeline and the offline cache and
//! sync engine built on top of it.

pub mod engine;
pub mod fetch;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Engine, EngineBuilder, Request, Response, ResponseSource, SyncEvent};
pub use fetch::{FetchConfig, FetchError, HttpOrigin, Method, Origin, OriginRequest, OriginResponse, StatusCode};
