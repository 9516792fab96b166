//! The offline cache and sync engine.
//!
//! [`Engine`] is the request-handling function a host interposes between
//! its callers and the origin API. Every request is canonicalized, classified
//! by the [`PatternRouter`], then either served by a [`StrategyExecutor`]
//! strategy, passed straight through, or (for writes) sent to the origin with
//! invalidation on success and queueing on network failure.
//!
//! ### Data flow
//! ```text
//! Request ──► canonicalize ──► PatternRouter::classify
//!                                   │
//!        ┌──────────────┬───────────┴─────────┬────────────────┐
//!        ▼              ▼                     ▼                ▼
//!   CacheFirst     NetworkFirst            Bypass            Write
//!        │              │                     │                │
//!        └──── CacheDb ◄┘                   origin     2xx ► Invalidator
//!                                                       net-err ► SyncQueue
//! ```

pub mod connectivity;
pub mod inflight;
pub mod invalidate;
pub mod lifecycle;
pub mod router;
pub mod strategy;
pub mod sync;
pub mod types;

use bytes::Bytes;
use reqwest::Method;
use shelf_core::{AppConfig, CacheDb, CacheEntry, CacheKey, Clock, Error, GenerationKind, PendingAction, SystemClock};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

pub use connectivity::Connectivity;
pub use invalidate::{InvalidationEpoch, Invalidator, ResourceFamily};
pub use lifecycle::{ActiveVersion, InstallReport, LifecycleManager};
pub use router::{MethodScope, PatternRouter, RouteRule, Strategy, is_mutating};
pub use strategy::{NavigationFallback, StrategyExecutor, Target};
pub use sync::{ReplayReport, SyncEvent, SyncQueue};
pub use types::{Request, Response, ResponseSource, SOURCE_HEADER};

use crate::fetch::{FetchConfig, HttpOrigin, Origin, OriginRequest, canonicalize};

/// App shell candidates for offline navigations, tried in order.
const APP_SHELL_PATHS: &[&str] = &["/", "/index.html"];

/// Builder for [`Engine`]. Anything not supplied is created from the config.
pub struct EngineBuilder {
    config: AppConfig,
    db: Option<CacheDb>,
    origin: Option<Arc<dyn Origin>>,
    clock: Option<Arc<dyn Clock>>,
    router: Option<PatternRouter>,
    families: Option<Vec<ResourceFamily>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config, db: None, origin: None, clock: None, router: None, families: None }
    }

    pub fn db(mut self, db: CacheDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn origin(mut self, origin: Arc<dyn Origin>) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn router(mut self, router: PatternRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn families(mut self, families: Vec<ResourceFamily>) -> Self {
        self.families = Some(families);
        self
    }

    pub async fn build(self) -> Result<Engine, Error> {
        let base = Url::parse(&self.config.origin_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.config.origin_url)))?;

        let db = match self.db {
            Some(db) => db,
            None => CacheDb::open(&self.config.db_path).await?,
        };

        let origin: Arc<dyn Origin> = match self.origin {
            Some(origin) => origin,
            None => Arc::new(HttpOrigin::new(FetchConfig::from(&self.config))?),
        };

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let router = self.router.unwrap_or_else(|| PatternRouter::with_defaults(base.clone(), self.config.api_ttl()));

        let stored = db.active_version().await?;
        let active = ActiveVersion::new(stored.as_deref().unwrap_or(&self.config.version));

        let invalidator = match self.families {
            Some(families) => Invalidator::new(db.clone(), active.clone(), families),
            None => Invalidator::with_defaults(db.clone(), active.clone()),
        };
        let queue = SyncQueue::new(db.clone(), Arc::clone(&origin), invalidator.clone(), self.config.max_replay_attempts);
        let strategy = StrategyExecutor::new(db.clone(), Arc::clone(&origin), Arc::clone(&clock), invalidator.epoch());
        let lifecycle = LifecycleManager::new(
            db.clone(),
            Arc::clone(&origin),
            Arc::clone(&clock),
            base.clone(),
            self.config.precache_manifest.clone(),
            active.clone(),
        );

        let shell = APP_SHELL_PATHS
            .iter()
            .filter_map(|path| base.join(path).ok())
            .map(|url| CacheKey::get(url.as_str()))
            .collect();

        tracing::debug!(origin = %base, version = %active.get(), "engine built");

        Ok(Engine {
            inner: Arc::new(Inner {
                offline_document: Bytes::from(self.config.offline_document.clone()),
                config: self.config,
                base,
                db,
                origin,
                clock,
                router,
                strategy,
                invalidator,
                queue,
                lifecycle,
                active,
                connectivity: Connectivity::new(true),
                shell,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

struct Inner {
    config: AppConfig,
    base: Url,
    db: CacheDb,
    origin: Arc<dyn Origin>,
    clock: Arc<dyn Clock>,
    router: PatternRouter,
    strategy: StrategyExecutor,
    invalidator: Invalidator,
    queue: SyncQueue,
    lifecycle: LifecycleManager,
    active: ActiveVersion,
    connectivity: Connectivity,
    shell: Vec<CacheKey>,
    offline_document: Bytes,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Offline cache and sync engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn builder(config: AppConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Install the configured version (precache + generation swap).
    pub async fn start(&self) -> Result<InstallReport, Error> {
        self.inner.lifecycle.install(&self.inner.config.version).await
    }

    /// Start the reconnect listener and, if configured, the connectivity probe.
    pub fn spawn_background(&self) {
        let mut handles = vec![connectivity::spawn_listener(
            &self.inner.connectivity,
            self.inner.queue.clone(),
            self.inner.config.clone(),
        )];

        if let Some(interval) = self.inner.config.probe_interval() {
            match self.inner.base.join(&self.inner.config.probe_path) {
                Ok(url) => handles.push(connectivity::spawn_probe(
                    &self.inner.connectivity,
                    Arc::clone(&self.inner.origin),
                    url,
                    interval,
                )),
                Err(e) => tracing::warn!(probe_path = %self.inner.config.probe_path, error = %e, "invalid probe path, polling disabled"),
            }
        }

        self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner()).extend(handles);
    }

    /// Stop background tasks started by [`Engine::spawn_background`].
    pub fn shutdown(&self) {
        for handle in self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            handle.abort();
        }
    }

    /// Handle one inbound request.
    pub async fn handle(&self, request: Request) -> Result<Response, Error> {
        let url = canonicalize(&request.url, &self.inner.base)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", request.url)))?;
        let rule = self.inner.router.classify(&url, &request.method);

        tracing::debug!(method = %request.method, %url, rule = %rule.name, strategy = ?rule.strategy, "classified");

        if is_mutating(&request.method) {
            return self.write(request, url, rule.replayable).await;
        }

        let origin_request =
            OriginRequest { method: request.method.clone(), url: url.clone(), headers: request.headers.clone(), body: request.body.clone() };

        if rule.strategy == Strategy::Bypass || request.method != Method::GET {
            let response = self.inner.origin.fetch(&origin_request).await?;
            return Ok(Response::from_origin(response));
        }

        let key = CacheKey::get(url.as_str());
        let target = self.target(rule.generation);

        match rule.strategy {
            Strategy::CacheFirst => self.inner.strategy.cache_first(&origin_request, &key, &target, rule.ttl).await,
            _ => {
                let navigation = request.navigate || (rule.navigation_fallback && accepts_html(&request.headers));
                let fallback = navigation.then(|| self.navigation_fallback());
                self.inner.strategy.network_first(&origin_request, &key, &target, fallback.as_ref()).await
            }
        }
    }

    async fn write(&self, request: Request, url: Url, replayable: bool) -> Result<Response, Error> {
        let origin_request =
            OriginRequest { method: request.method.clone(), url: url.clone(), headers: request.headers, body: request.body };

        let result = self.inner.origin.fetch(&origin_request).await;
        match result {
            Ok(response) => {
                if response.status.is_success() {
                    self.invalidate_after_write(&url).await;
                }
                Ok(Response::from_origin(response))
            }
            Err(e) if replayable && e.is_transient() => {
                tracing::debug!(%url, error = %e, "write failed on network, queueing");
                let action = PendingAction::new(
                    origin_request.method.as_str(),
                    url.as_str(),
                    origin_request.headers,
                    origin_request.body.to_vec(),
                    self.inner.clock.now_ms(),
                );
                self.inner.queue.enqueue(&action).await?;
                Ok(Response::queued(&action.id))
            }
            Err(e) => {
                // The origin answered, so the write took effect even though
                // the response cannot be handed back.
                if e.answered_status().is_some_and(|status| status.is_success()) {
                    self.invalidate_after_write(&url).await;
                }
                Err(e.into())
            }
        }
    }

    async fn invalidate_after_write(&self, url: &Url) {
        if let Err(e) = self.inner.invalidator.on_mutation_success(url).await {
            tracing::warn!(%url, error = %e, "invalidation after write failed");
        }
    }

    fn target(&self, kind: GenerationKind) -> Target {
        let max_entries = match kind {
            GenerationKind::Runtime => Some(self.inner.config.max_runtime_entries),
            GenerationKind::Image => Some(self.inner.config.max_image_entries),
            GenerationKind::Precache | GenerationKind::Api => None,
        };
        Target { generation: self.inner.active.generation(kind), max_entries }
    }

    fn navigation_fallback(&self) -> NavigationFallback {
        NavigationFallback {
            precache_generation: self.inner.active.generation(GenerationKind::Precache),
            shell: self.inner.shell.clone(),
            offline_document: self.inner.offline_document.clone(),
        }
    }

    /// Replay queued writes now.
    pub async fn replay_all(&self) -> Result<ReplayReport, Error> {
        self.inner.queue.replay_all().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.queue.subscribe()
    }

    /// Feed the connectivity signal. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.inner.connectivity.set_online(online)
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Cached entry for `url` in the active generations, checking the
    /// generation its route writes to first.
    pub async fn lookup(&self, url: &str) -> Result<CacheEntry, Error> {
        let url = canonicalize(url, &self.inner.base).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let key = CacheKey::get(url.as_str());
        let preferred = self.inner.router.classify(&url, &Method::GET).generation;

        let order = std::iter::once(preferred).chain(GenerationKind::ALL.into_iter().filter(|k| *k != preferred));
        for kind in order {
            if let Some(entry) = self.inner.db.get_entry(&self.inner.active.generation(kind), &key).await? {
                return Ok(entry);
            }
        }
        Err(Error::CacheMiss(key.to_string()))
    }

    /// Delete the cached entry for `url` from every active generation.
    pub async fn evict(&self, url: &str) -> Result<u64, Error> {
        let url = canonicalize(url, &self.inner.base).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let key = CacheKey::get(url.as_str());
        let mut removed = 0;
        for kind in GenerationKind::ALL {
            if self.inner.db.delete_entry(&self.inner.active.generation(kind), &key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete `api` entries older than the API TTL.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let cutoff = self.inner.clock.now_ms() - self.inner.config.api_ttl().as_millis() as i64;
        let generation = self.inner.active.generation(GenerationKind::Api);
        let removed = self.inner.db.purge_older_than(&generation, cutoff).await?;
        tracing::info!(%generation, removed, "purged expired entries");
        Ok(removed)
    }

    /// Wait for background refreshes to finish.
    pub async fn settle(&self) {
        self.inner.strategy.settle().await;
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    pub fn db(&self) -> &CacheDb {
        &self.inner.db
    }

    pub fn router(&self) -> &PatternRouter {
        &self.inner.router
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn active_version(&self) -> String {
        self.inner.active.get()
    }
}

fn accepts_html(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(name, value)| name.eq_ignore_ascii_case("accept") && value.contains("text/html"))
}
