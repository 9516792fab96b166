//! Cache generations and the active-version pointer.
//!
//! A generation is a named partition of `cache_entries`. Its identifier is
//! derived from a kind and the deploy version (`shelf-api-v3`), so the names
//! are stable across restarts of the same version and change on redeploy.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

const ACTIVE_VERSION_KEY: &str = "active_version";

/// The fixed set of generation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    /// Assets installed from the deploy manifest.
    Precache,
    /// Documents and uncategorised GETs.
    Runtime,
    /// Origin API reads.
    Api,
    /// Binary image assets.
    Image,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 4] =
        [GenerationKind::Precache, GenerationKind::Runtime, GenerationKind::Api, GenerationKind::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Precache => "precache",
            GenerationKind::Runtime => "runtime",
            GenerationKind::Api => "api",
            GenerationKind::Image => "image",
        }
    }

    /// Generation identifier for this kind under `version`.
    pub fn id(&self, version: &str) -> String {
        format!("shelf-{}-{}", self.as_str(), version)
    }

    /// All generation identifiers allowed to exist for `version`.
    pub fn allow_list(version: &str) -> Vec<String> {
        Self::ALL.iter().map(|kind| kind.id(version)).collect()
    }
}

impl std::fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown generation: {s}")))
    }
}

impl CacheDb {
    /// Distinct generation identifiers currently holding entries.
    pub async fn list_generations(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT DISTINCT generation FROM cache_entries ORDER BY generation")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<Result<Vec<String>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every generation not named in `allowed`.
    ///
    /// Returns the identifiers that were removed.
    pub async fn retain_generations(&self, allowed: &[String]) -> Result<Vec<String>, Error> {
        let allowed = allowed.to_vec();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let existing: Vec<String> = {
                    let mut stmt = tx.prepare("SELECT DISTINCT generation FROM cache_entries")?;
                    let rows = stmt.query_map([], |row| row.get(0))?;
                    rows.collect::<Result<Vec<String>, _>>()?
                };

                let doomed: Vec<String> = existing.into_iter().filter(|g| !allowed.contains(g)).collect();
                for generation in &doomed {
                    tx.execute("DELETE FROM cache_entries WHERE generation = ?1", params![generation])?;
                }
                tx.commit()?;
                Ok(doomed)
            })
            .await
            .map_err(Error::from)
    }

    /// Version whose generations are currently served.
    pub async fn active_version(&self) -> Result<Option<String>, Error> {
        self.conn
            .call(|conn| -> Result<Option<String>, Error> {
                let value = conn
                    .query_row(
                        "SELECT value FROM cache_meta WHERE key = ?1",
                        params![ACTIVE_VERSION_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Error::from)
    }

    /// Swap the active version pointer in a single statement.
    pub async fn set_active_version(&self, version: &str, now_ms: i64) -> Result<(), Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_meta (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![ACTIVE_VERSION_KEY, version, now_ms],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheKey};

    fn entry(generation: &str, url: &str) -> CacheEntry {
        CacheEntry {
            key: CacheKey::get(url),
            status: 200,
            headers: vec![],
            body: b"x".to_vec(),
            stored_at: 1,
            generation: generation.to_string(),
        }
    }

    #[test]
    fn test_generation_ids() {
        assert_eq!(GenerationKind::Api.id("v3"), "shelf-api-v3");
        let allow = GenerationKind::allow_list("v3");
        assert_eq!(allow.len(), 4);
        assert!(allow.contains(&"shelf-precache-v3".to_string()));
        assert!(allow.contains(&"shelf-image-v3".to_string()));
    }

    #[test]
    fn test_generation_from_str() {
        assert_eq!("runtime".parse::<GenerationKind>().unwrap(), GenerationKind::Runtime);
        assert!("videos".parse::<GenerationKind>().is_err());
    }

    #[tokio::test]
    async fn test_retain_generations() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(&entry("shelf-api-v1", "https://x.test/a")).await.unwrap();
        db.put_entry(&entry("shelf-api-v2", "https://x.test/a")).await.unwrap();
        db.put_entry(&entry("legacy-cache", "https://x.test/b")).await.unwrap();

        let removed = db.retain_generations(&GenerationKind::allow_list("v2")).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&"shelf-api-v1".to_string()));
        assert!(removed.contains(&"legacy-cache".to_string()));
        assert_eq!(db.list_generations().await.unwrap(), vec!["shelf-api-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_active_version_pointer() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.active_version().await.unwrap().is_none());

        db.set_active_version("v1", 10).await.unwrap();
        db.set_active_version("v2", 20).await.unwrap();
        assert_eq!(db.active_version().await.unwrap().as_deref(), Some("v2"));
    }
}
