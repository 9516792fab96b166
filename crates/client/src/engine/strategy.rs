//! Serving strategies.
//!
//! - **CacheFirst**: serve a cached entry if present; when it is past its TTL,
//!   also refresh it in the background (stale-while-revalidate).
//! - **NetworkFirst**: ask the origin; on a network failure fall back to the
//!   cached entry, then (for navigations) the app shell or offline document.
//!
//! Every 2xx GET observed here is written to its target generation, unless
//! an invalidation ran while it was in flight.

use bytes::Bytes;
use futures_util::FutureExt;
use shelf_core::{CacheDb, CacheEntry, CacheKey, Clock, Error};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::inflight::InFlight;
use super::invalidate::InvalidationEpoch;
use super::types::{Response, ResponseSource};
use crate::fetch::{FetchError, Origin, OriginRequest, OriginResponse};

/// Generation a strategy reads from and writes to.
#[derive(Debug, Clone)]
pub struct Target {
    pub generation: String,
    /// Trim the generation to this many entries after each write.
    pub max_entries: Option<usize>,
}

/// What a failed navigation may fall back to.
#[derive(Debug, Clone)]
pub struct NavigationFallback {
    pub precache_generation: String,
    /// App shell keys tried in order.
    pub shell: Vec<CacheKey>,
    pub offline_document: Bytes,
}

/// Executes CacheFirst / NetworkFirst against the store and the origin.
#[derive(Clone)]
pub struct StrategyExecutor {
    db: CacheDb,
    origin: Arc<dyn Origin>,
    clock: Arc<dyn Clock>,
    epoch: InvalidationEpoch,
    inflight: InFlight,
    background: Arc<Mutex<JoinSet<()>>>,
}

impl StrategyExecutor {
    pub fn new(db: CacheDb, origin: Arc<dyn Origin>, clock: Arc<dyn Clock>, epoch: InvalidationEpoch) -> Self {
        Self {
            db,
            origin,
            clock,
            epoch,
            inflight: InFlight::new(),
            background: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Cache-first with an optional TTL and stale-while-revalidate.
    pub async fn cache_first(
        &self, request: &OriginRequest, key: &CacheKey, target: &Target, ttl: Option<Duration>,
    ) -> Result<Response, Error> {
        if let Some(entry) = self.db.get_entry(&target.generation, key).await? {
            let now = self.clock.now_ms();
            let ttl_ms = ttl.map(|t| t.as_millis() as i64);

            if entry.is_fresh(now, ttl_ms) {
                tracing::debug!(%key, generation = %target.generation, "cache hit");
                return Response::from_entry(entry, ResponseSource::CacheFresh);
            }

            tracing::debug!(%key, age_ms = entry.age_ms(now), "serving stale entry, refreshing");
            self.spawn_refresh(request.clone(), key.clone(), target.clone(), entry.stored_at)
                .await;
            return Response::from_entry(entry, ResponseSource::CacheStale);
        }

        tracing::debug!(%key, generation = %target.generation, "cache miss");
        let epoch = self.epoch.current();
        let response = self.fetch(request, key, epoch).await?;
        if response.status.is_success() {
            self.store(key, target, &response, epoch).await?;
        }
        Ok(Response::from_origin(response))
    }

    /// Network-first with cache and navigation fallbacks.
    pub async fn network_first(
        &self, request: &OriginRequest, key: &CacheKey, target: &Target, navigation: Option<&NavigationFallback>,
    ) -> Result<Response, Error> {
        let epoch = self.epoch.current();
        let err = match self.fetch(request, key, epoch).await {
            Ok(response) => {
                if response.status.is_success() {
                    self.store(key, target, &response, epoch).await?;
                }
                return Ok(Response::from_origin(response));
            }
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err.into()),
        };

        if let Some(entry) = self.db.get_entry(&target.generation, key).await? {
            tracing::debug!(%key, error = %err, "network failed, serving cached copy");
            return Response::from_entry(entry, ResponseSource::CacheFallback);
        }

        let Some(fallback) = navigation else {
            return Err(err.into());
        };

        for shell in &fallback.shell {
            if let Some(entry) = self.db.get_entry(&fallback.precache_generation, shell).await? {
                tracing::debug!(%key, shell = %shell, "network failed, serving app shell");
                return Response::from_entry(entry, ResponseSource::AppShell);
            }
        }

        tracing::debug!(%key, "network failed, serving offline document");
        Ok(Response::offline_document(fallback.offline_document.clone()))
    }

    /// Fetch through the coalescing table.
    ///
    /// Only fetches started under the same invalidation epoch are joined, so a
    /// read issued after a write never receives a response from before it.
    async fn fetch(&self, request: &OriginRequest, key: &CacheKey, epoch: u64) -> Result<OriginResponse, FetchError> {
        let origin = Arc::clone(&self.origin);
        let request = request.clone();
        self.inflight
            .run(&format!("{epoch}:{}", key.hash()), move || async move { origin.fetch(&request).await }.boxed())
            .await
    }

    fn entry_for(&self, key: &CacheKey, target: &Target, response: &OriginResponse) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            status: response.status.as_u16(),
            headers: response.headers.clone(),
            body: response.body.to_vec(),
            stored_at: self.clock.now_ms(),
            generation: target.generation.clone(),
        }
    }

    async fn store(&self, key: &CacheKey, target: &Target, response: &OriginResponse, epoch: u64) -> Result<(), Error> {
        let entry = self.entry_for(key, target, response);
        let current = self.epoch.clone();
        if !self.db.put_entry_if(&entry, move || current.current() == epoch).await? {
            tracing::debug!(%key, "invalidated while in flight, not storing");
            return Ok(());
        }
        self.enforce_bound(target).await
    }

    async fn enforce_bound(&self, target: &Target) -> Result<(), Error> {
        if let Some(max) = target.max_entries {
            let trimmed = self.db.trim_generation(&target.generation, max).await?;
            if trimmed > 0 {
                tracing::debug!(generation = %target.generation, trimmed, "trimmed generation");
            }
        }
        Ok(())
    }

    /// Refresh a stale entry without blocking the caller.
    ///
    /// The write only lands if the row still carries `observed_stored_at`
    /// and no invalidation ran meanwhile; anything newer wins over this refresh.
    async fn spawn_refresh(&self, request: OriginRequest, key: CacheKey, target: Target, observed_stored_at: i64) {
        let this = self.clone();
        let epoch = self.epoch.current();
        let mut tasks = self.background.lock().await;
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let response = match this.fetch(&request, &key, epoch).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "background refresh failed");
                    return;
                }
            };

            if !response.status.is_success() {
                tracing::warn!(%key, status = response.status.as_u16(), "background refresh rejected, keeping stale entry");
                return;
            }

            let entry = this.entry_for(&key, &target, &response);
            let current = this.epoch.clone();
            let unchanged = move || current.current() == epoch;
            match this.db.replace_entry_if_unchanged(&entry, observed_stored_at, unchanged).await {
                Ok(true) => {
                    tracing::debug!(%key, "background refresh stored");
                    if let Err(e) = this.enforce_bound(&target).await {
                        tracing::warn!(error = %e, "failed to trim generation");
                    }
                }
                Ok(false) => tracing::debug!(%key, "background refresh discarded, entry changed meanwhile"),
                Err(e) => tracing::warn!(%key, error = %e, "background refresh write failed"),
            }
        });
    }

    /// Wait for every background refresh started so far.
    ///
    /// The set is taken out of the lock first, so stale reads arriving
    /// meanwhile can still spawn refreshes without waiting.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.background.lock().await);
        while tasks.join_next().await.is_some() {}
    }
}
