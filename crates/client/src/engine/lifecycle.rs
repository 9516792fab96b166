//! Cache generation lifecycle.
//!
//! Installing a version precaches its manifest, swaps the active-version
//! pointer, then evicts every generation outside the new version's allow
//! list. This is the only place whole generations are deleted.

use serde::Serialize;
use shelf_core::{CacheDb, CacheEntry, CacheKey, Clock, Error, GenerationKind};
use std::sync::{Arc, RwLock};
use url::Url;

use crate::fetch::{Origin, OriginRequest, canonicalize};

/// Shared handle on the active deploy version.
#[derive(Debug, Clone)]
pub struct ActiveVersion(Arc<RwLock<String>>);

impl ActiveVersion {
    pub fn new(version: &str) -> Self {
        Self(Arc::new(RwLock::new(version.to_string())))
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set(&self, version: &str) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = version.to_string();
    }

    /// Generation id of `kind` under the active version.
    pub fn generation(&self, kind: GenerationKind) -> String {
        kind.id(&self.get())
    }
}

/// Outcome of an install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub version: String,
    pub previous: Option<String>,
    /// Manifest assets fetched and stored. Zero when already installed.
    pub precached: usize,
    /// Generation ids deleted because they were not in the allow list.
    pub evicted: Vec<String>,
}

/// Owns precaching and generation eviction.
#[derive(Clone)]
pub struct LifecycleManager {
    db: CacheDb,
    origin: Arc<dyn Origin>,
    clock: Arc<dyn Clock>,
    base: Url,
    manifest: Vec<String>,
    active: ActiveVersion,
}

impl LifecycleManager {
    pub fn new(
        db: CacheDb, origin: Arc<dyn Origin>, clock: Arc<dyn Clock>, base: Url, manifest: Vec<String>,
        active: ActiveVersion,
    ) -> Self {
        Self { db, origin, clock, base, manifest, active }
    }

    pub fn active(&self) -> &ActiveVersion {
        &self.active
    }

    /// Install `version` and make it active.
    ///
    /// Any manifest asset that cannot be fetched with a 2xx aborts the install
    /// before anything is written; the previous version stays active.
    pub async fn install(&self, version: &str) -> Result<InstallReport, Error> {
        if version.trim().is_empty() {
            return Err(Error::InvalidInput("version must not be empty".into()));
        }

        let previous = self.db.active_version().await?;
        let precache = GenerationKind::Precache.id(version);

        let already_installed =
            previous.as_deref() == Some(version) && self.db.count_entries(&precache).await? > 0;

        let precached = if already_installed {
            tracing::debug!(version, "version already installed, skipping precache");
            0
        } else {
            self.precache(version, &precache).await?
        };

        self.db.set_active_version(version, self.clock.now_ms()).await?;
        self.active.set(version);

        let evicted = self.db.retain_generations(&GenerationKind::allow_list(version)).await?;

        tracing::info!(
            version,
            previous = previous.as_deref().unwrap_or("none"),
            precached,
            evicted = evicted.len(),
            "cache version installed"
        );

        Ok(InstallReport { version: version.to_string(), previous, precached, evicted })
    }

    async fn precache(&self, version: &str, generation: &str) -> Result<usize, Error> {
        let mut entries = Vec::with_capacity(self.manifest.len());

        for asset in &self.manifest {
            let url = canonicalize(asset, &self.base).map_err(|e| Error::InvalidUrl(format!("{asset}: {e}")))?;
            let response = self
                .origin
                .fetch(&OriginRequest::get(url.clone()))
                .await
                .map_err(|e| Error::InstallFailed(format!("{version}: {url}: {e}")))?;

            if !response.status.is_success() {
                return Err(Error::InstallFailed(format!("{version}: {url}: status {}", response.status.as_u16())));
            }

            entries.push(CacheEntry {
                key: CacheKey::get(url.as_str()),
                status: response.status.as_u16(),
                headers: response.headers,
                body: response.body.to_vec(),
                stored_at: self.clock.now_ms(),
                generation: generation.to_string(),
            });
        }

        let count = entries.len();
        self.db.put_entries(entries).await?;
        Ok(count)
    }
}
