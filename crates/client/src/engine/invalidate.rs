//! Write-path invalidation.
//!
//! A successful mutation deletes every `api` entry whose path falls under one
//! of the read prefixes tied to the mutated resource family. Invalidation is
//! coarse: deleting too much is fine, leaving a stale read behind is not.

use shelf_core::{CacheDb, Error, GenerationKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use super::lifecycle::ActiveVersion;

/// Reads that every write can affect (totals, search results).
const AGGREGATE_PREFIXES: &[&str] = &["/api/summary", "/api/summaries", "/api/search", "/api/stats"];

/// A resource and the read paths its writes make stale.
#[derive(Debug, Clone)]
pub struct ResourceFamily {
    /// First path segment of the resource, e.g. `entries` for `/api/entries/42`.
    pub name: String,
    pub read_prefixes: Vec<String>,
}

impl ResourceFamily {
    pub fn new(name: &str, read_prefixes: &[&str]) -> Self {
        Self { name: name.to_string(), read_prefixes: read_prefixes.iter().map(|p| p.to_string()).collect() }
    }
}

/// Resource segment of a write path: `/api/entries/42` and `/entries` both give `entries`.
fn resource_of(path: &str) -> Option<&str> {
    let rest = path.trim_start_matches('/');
    let rest = rest.strip_prefix("api/").unwrap_or(rest);
    rest.split('/').next().filter(|segment| !segment.is_empty() && *segment != "api")
}

/// Counter advanced before every invalidation.
///
/// A read captures it before going to the origin and stores what it got
/// only if the counter has not moved by the time the write runs.
#[derive(Debug, Clone, Default)]
pub struct InvalidationEpoch(Arc<AtomicU64>);

impl InvalidationEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn advance(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Deletes `api` entries made stale by a successful write.
#[derive(Clone)]
pub struct Invalidator {
    db: CacheDb,
    active: ActiveVersion,
    families: Vec<ResourceFamily>,
    epoch: InvalidationEpoch,
}

impl Invalidator {
    pub fn new(db: CacheDb, active: ActiveVersion, families: Vec<ResourceFamily>) -> Self {
        Self { db, active, families, epoch: InvalidationEpoch::new() }
    }

    /// Epoch shared with the readers that must not store across an invalidation.
    pub fn epoch(&self) -> InvalidationEpoch {
        self.epoch.clone()
    }

    /// Invalidator with the standard resource families.
    pub fn with_defaults(db: CacheDb, active: ActiveVersion) -> Self {
        let families = vec![
            ResourceFamily::new("entries", &["/api/entries", "/api/listings"]),
            ResourceFamily::new("products", &["/api/products", "/api/listings", "/api/categories"]),
            ResourceFamily::new("categories", &["/api/categories", "/api/products", "/api/entries"]),
        ];
        Self::new(db, active, families)
    }

    /// Path prefixes a successful write to `url` invalidates.
    pub fn prefixes_for(&self, url: &Url) -> Vec<String> {
        let mut prefixes: Vec<String> = AGGREGATE_PREFIXES.iter().map(|p| p.to_string()).collect();

        if let Some(resource) = resource_of(url.path()) {
            match self.families.iter().find(|f| f.name == resource) {
                Some(family) => prefixes.extend(family.read_prefixes.iter().cloned()),
                None => prefixes.push(format!("/api/{resource}")),
            }
        }

        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    /// Delete affected entries from the active `api` generation.
    ///
    /// Returns the number of entries removed.
    pub async fn on_mutation_success(&self, url: &Url) -> Result<u64, Error> {
        self.epoch.advance();
        let generation = GenerationKind::Api.id(&self.active.get());
        let prefixes = self.prefixes_for(url);
        let removed = self.db.delete_by_path_prefixes(&generation, &prefixes).await?;
        tracing::debug!(%url, %generation, removed, "invalidated after write");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::{CacheEntry, CacheKey};

    async fn seed(db: &CacheDb, generation: &str, path: &str) -> CacheKey {
        let key = CacheKey::get(&format!("https://app.test{path}"));
        db.put_entry(&CacheEntry {
            key: key.clone(),
            status: 200,
            headers: vec![],
            body: b"{}".to_vec(),
            stored_at: 0,
            generation: generation.to_string(),
        })
        .await
        .unwrap();
        key
    }

    async fn invalidator() -> (CacheDb, Invalidator) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let invalidator = Invalidator::with_defaults(db.clone(), ActiveVersion::new("v1"));
        (db, invalidator)
    }

    #[test]
    fn test_resource_of() {
        assert_eq!(resource_of("/api/entries/42"), Some("entries"));
        assert_eq!(resource_of("/entries"), Some("entries"));
        assert_eq!(resource_of("/api/"), None);
        assert_eq!(resource_of("/"), None);
    }

    #[tokio::test]
    async fn test_family_reads_removed() {
        let (db, invalidator) = invalidator().await;
        let gen_id = "shelf-api-v1";
        let detail = seed(&db, gen_id, "/api/entries/42").await;
        let listing = seed(&db, gen_id, "/api/listings?page=1").await;
        let summary = seed(&db, gen_id, "/api/summary?month=2024-05").await;
        let unrelated = seed(&db, gen_id, "/api/budgets").await;

        let url = Url::parse("https://app.test/api/entries").unwrap();
        let removed = invalidator.on_mutation_success(&url).await.unwrap();

        assert_eq!(removed, 3);
        for key in [&detail, &listing, &summary] {
            assert!(db.get_entry(gen_id, key).await.unwrap().is_none(), "{key} survived");
        }
        assert!(db.get_entry(gen_id, &unrelated).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_resource_invalidates_its_own_prefix() {
        let (db, invalidator) = invalidator().await;
        let budget = seed(&db, "shelf-api-v1", "/api/budgets/7").await;

        let url = Url::parse("https://app.test/api/budgets/7").unwrap();
        invalidator.on_mutation_success(&url).await.unwrap();

        assert!(db.get_entry("shelf-api-v1", &budget).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_generations_untouched() {
        let (db, invalidator) = invalidator().await;
        let runtime = seed(&db, "shelf-runtime-v1", "/api/entries/1").await;
        let old_api = seed(&db, "shelf-api-v0", "/api/entries/1").await;

        let url = Url::parse("https://app.test/entries").unwrap();
        invalidator.on_mutation_success(&url).await.unwrap();

        assert!(db.get_entry("shelf-runtime-v1", &runtime).await.unwrap().is_some());
        assert!(db.get_entry("shelf-api-v0", &old_api).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_follows_active_version() {
        let (db, invalidator) = invalidator().await;
        let key = seed(&db, "shelf-api-v2", "/api/products/3").await;

        invalidator.active.set("v2");
        let url = Url::parse("https://app.test/api/products/3").unwrap();
        invalidator.on_mutation_success(&url).await.unwrap();

        assert!(db.get_entry("shelf-api-v2", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefixes_include_aggregates() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let invalidator = Invalidator::new(db, ActiveVersion::new("v1"), vec![]);
        let prefixes = invalidator.prefixes_for(&Url::parse("https://app.test/api/widgets").unwrap());
        assert!(prefixes.contains(&"/api/summary".to_string()));
        assert!(prefixes.contains(&"/api/widgets".to_string()));
    }

    #[tokio::test]
    async fn test_mutation_advances_epoch() {
        let (_db, invalidator) = invalidator().await;
        let epoch = invalidator.epoch();
        let before = epoch.current();

        let url = Url::parse("https://app.test/api/entries/1").unwrap();
        invalidator.on_mutation_success(&url).await.unwrap();

        assert_eq!(epoch.current(), before + 1);
    }
}
