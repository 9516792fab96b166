//! Coalescing of identical concurrent origin fetches.
//!
//! While a GET for a key is in flight, further requests for the same key
//! await the same future instead of issuing a second network call.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::fetch::{FetchError, OriginResponse};

type SharedFetch = Shared<BoxFuture<'static, Result<OriginResponse, FetchError>>>;

/// Table of fetches currently in flight, keyed by cache key hash.
#[derive(Clone, Default)]
pub struct InFlight {
    pending: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` unless a fetch for `key` is already running, in which
    /// case join it.
    pub async fn run<F>(&self, key: &str, start: F) -> Result<OriginResponse, FetchError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<OriginResponse, FetchError>>,
    {
        let fetch = {
            let mut pending = self.pending.lock().await;
            match pending.get(key) {
                Some(existing) => {
                    tracing::debug!(key, "joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    let fetch = start().shared();
                    pending.insert(key.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        let mut pending = self.pending.lock().await;
        if pending.get(key).is_some_and(|current| current.ptr_eq(&fetch)) {
            pending.remove(key);
        }

        result
    }

    /// Number of distinct fetches currently in flight.
    pub async fn active(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn slow_fetch(calls: Arc<AtomicUsize>) -> BoxFuture<'static, Result<OriginResponse, FetchError>> {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(OriginResponse { status: StatusCode::OK, headers: vec![], body: Bytes::from_static(b"x"), fetch_ms: 50 })
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_concurrent_fetches_coalesce() {
        let inflight = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = inflight.run("k", || slow_fetch(calls.clone()));
        let b = inflight.run("k", || slow_fetch(calls.clone()));
        let (a, b) = tokio::join!(a, b);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().body, b.unwrap().body);
        assert_eq!(inflight.active().await, 0);
    }

    #[tokio::test]
    async fn test_sequential_fetches_do_not_reuse_results() {
        let inflight = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        inflight.run("k", || slow_fetch(calls.clone())).await.unwrap();
        inflight.run("k", || slow_fetch(calls.clone())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_separately() {
        let inflight = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = inflight.run("a", || slow_fetch(calls.clone()));
        let b = inflight.run("b", || slow_fetch(calls.clone()));
        let _ = tokio::join!(a, b);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
