//! Cached response CRUD.
//!
//! Entries are keyed by `(generation, key_hash)`. A write replaces the whole
//! row; `stored_at` is assigned by the writer and never patched afterwards.

use super::connection::CacheDb;
use super::key::CacheKey;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A cached origin response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: u16,
    /// Response headers in origin order, duplicates preserved.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Epoch milliseconds at write time.
    pub stored_at: i64,
    pub generation: String,
}

impl CacheEntry {
    /// Milliseconds elapsed since the entry was written.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.stored_at
    }

    /// Fresh when `age <= ttl`; entries without a TTL never go stale.
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: Option<i64>) -> bool {
        match ttl_ms {
            Some(ttl) => self.age_ms(now_ms) <= ttl,
            None => true,
        }
    }
}

/// Lightweight view of an entry for listings.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct EntrySummary {
    pub generation: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub stored_at: i64,
    pub size_bytes: i64,
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(CacheEntry, String)> {
    let headers_json: String = row.get(3)?;
    let entry = CacheEntry {
        key: CacheKey { method: row.get(0)?, url: row.get(1)? },
        status: row.get(2)?,
        headers: Vec::new(),
        body: row.get(4)?,
        stored_at: row.get(5)?,
        generation: row.get(6)?,
    };
    Ok((entry, headers_json))
}

fn upsert(conn: &rusqlite::Connection, entry: &CacheEntry, headers_json: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO cache_entries (
            generation, key_hash, method, url, path, status, headers_json, body, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(generation, key_hash) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            path = excluded.path,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            &entry.generation,
            entry.key.hash(),
            &entry.key.method,
            &entry.key.url,
            entry.key.path(),
            entry.status,
            headers_json,
            &entry.body,
            entry.stored_at,
        ],
    )?;
    Ok(())
}

impl CacheDb {
    /// Get an entry from a generation.
    ///
    /// Returns None if the key is not cached there.
    pub async fn get_entry(&self, generation: &str, key: &CacheKey) -> Result<Option<CacheEntry>, Error> {
        let generation = generation.to_string();
        let key_hash = key.hash();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status, headers_json, body, stored_at, generation
                     FROM cache_entries WHERE generation = ?1 AND key_hash = ?2",
                )?;

                match stmt.query_row(params![generation, key_hash], row_to_entry) {
                    Ok((mut entry, headers_json)) => {
                        entry.headers = serde_json::from_str(&headers_json)?;
                        Ok(Some(entry))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace an entry. Last write wins per key.
    pub async fn put_entry(&self, entry: &CacheEntry) -> Result<(), Error> {
        let entry = entry.clone();
        let headers_json = serde_json::to_string(&entry.headers)?;
        self.conn
            .call(move |conn| -> Result<(), Error> { upsert(conn, &entry, &headers_json) })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace an entry if `still_valid` holds when the write runs.
    ///
    /// The check executes on the connection thread, so it is ordered with
    /// every other statement against the store. Returns whether the write
    /// happened.
    pub async fn put_entry_if<F>(&self, entry: &CacheEntry, still_valid: F) -> Result<bool, Error>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let entry = entry.clone();
        let headers_json = serde_json::to_string(&entry.headers)?;
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                if !still_valid() {
                    return Ok(false);
                }
                upsert(conn, &entry, &headers_json)?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace several entries in one transaction.
    pub async fn put_entries(&self, entries: Vec<CacheEntry>) -> Result<(), Error> {
        let rows = entries
            .into_iter()
            .map(|entry| Ok((serde_json::to_string(&entry.headers)?, entry)))
            .collect::<Result<Vec<_>, Error>>()?;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for (headers_json, entry) in &rows {
                    upsert(&tx, entry, headers_json)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Replace an entry only if the stored row still carries `expected_stored_at`.
    ///
    /// Used by background refreshes: if another writer stored a newer entry
    /// (or the entry was invalidated) since the stale read, the refresh result
    /// is discarded. `still_valid` is checked on the connection thread just
    /// before the update. Returns whether the write happened.
    pub async fn replace_entry_if_unchanged<F>(
        &self, entry: &CacheEntry, expected_stored_at: i64, still_valid: F,
    ) -> Result<bool, Error>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let entry = entry.clone();
        let headers_json = serde_json::to_string(&entry.headers)?;
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                if !still_valid() {
                    return Ok(false);
                }
                let updated = conn.execute(
                    "UPDATE cache_entries SET
                        method = ?3, url = ?4, path = ?5, status = ?6,
                        headers_json = ?7, body = ?8, stored_at = ?9
                    WHERE generation = ?1 AND key_hash = ?2 AND stored_at = ?10",
                    params![
                        &entry.generation,
                        entry.key.hash(),
                        &entry.key.method,
                        &entry.key.url,
                        entry.key.path(),
                        entry.status,
                        headers_json,
                        &entry.body,
                        entry.stored_at,
                        expected_stored_at,
                    ],
                )?;
                Ok(updated == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a single entry. Returns whether it existed.
    pub async fn delete_entry(&self, generation: &str, key: &CacheKey) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key_hash = key.hash();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE generation = ?1 AND key_hash = ?2",
                    params![generation, key_hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry in a generation whose path starts with one of `prefixes`.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_by_path_prefixes(&self, generation: &str, prefixes: &[String]) -> Result<u64, Error> {
        let generation = generation.to_string();
        let prefixes = prefixes.to_vec();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut total = 0u64;
                {
                    let mut stmt = tx.prepare(
                        "DELETE FROM cache_entries
                         WHERE generation = ?1 AND substr(path, 1, length(?2)) = ?2",
                    )?;
                    for prefix in &prefixes {
                        total += stmt.execute(params![generation, prefix])? as u64;
                    }
                }
                tx.commit()?;
                Ok(total)
            })
            .await
            .map_err(Error::from)
    }

    /// List entries of a generation, newest first.
    pub async fn list_entries(&self, generation: &str) -> Result<Vec<EntrySummary>, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<EntrySummary>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT generation, method, url, status, stored_at, length(body)
                     FROM cache_entries WHERE generation = ?1
                     ORDER BY stored_at DESC, url ASC",
                )?;
                let rows = stmt.query_map(params![generation], |row| {
                    Ok(EntrySummary {
                        generation: row.get(0)?,
                        method: row.get(1)?,
                        url: row.get(2)?,
                        status: row.get(3)?,
                        stored_at: row.get(4)?,
                        size_bytes: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a generation.
    pub async fn count_entries(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete oldest entries until the generation holds at most `max_entries`.
    ///
    /// Returns the number of deleted entries.
    pub async fn trim_generation(&self, generation: &str, max_entries: usize) -> Result<u64, Error> {
        let generation = generation.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                if count <= max {
                    return Ok(0);
                }

                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE generation = ?1 AND key_hash IN (
                        SELECT key_hash FROM cache_entries WHERE generation = ?1
                        ORDER BY stored_at ASC LIMIT ?2
                    )",
                    params![generation, count - max],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries stored before `cutoff_ms`.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_older_than(&self, generation: &str, cutoff_ms: i64) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE generation = ?1 AND stored_at < ?2",
                    params![generation, cutoff_ms],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(generation: &str, url: &str, body: &str, stored_at: i64) -> CacheEntry {
        CacheEntry {
            key: CacheKey::get(url),
            status: 200,
            headers: vec![
                ("content-type".into(), "application/json".into()),
                ("set-cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
            ],
            body: body.as_bytes().to_vec(),
            stored_at,
            generation: generation.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("shelf-api-v1", "https://x.test/api/entries", "[1,2]", 10);

        db.put_entry(&entry).await.unwrap();

        let retrieved = db.get_entry("shelf-api-v1", &entry.key).await.unwrap().unwrap();
        assert_eq!(retrieved, entry);
    }

    #[tokio::test]
    async fn test_generations_are_separate() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("shelf-api-v1", "https://x.test/api/entries", "[]", 10);
        db.put_entry(&entry).await.unwrap();

        assert!(db.get_entry("shelf-runtime-v1", &entry.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_whole_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = make_entry("g", "https://x.test/a", "old", 10);
        let mut second = make_entry("g", "https://x.test/a", "new", 20);
        second.headers = vec![("etag".into(), "\"2\"".into())];

        db.put_entry(&first).await.unwrap();
        db.put_entry(&second).await.unwrap();

        let got = db.get_entry("g", &first.key).await.unwrap().unwrap();
        assert_eq!(got, second);
        assert_eq!(db.count_entries("g").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_if_unchanged() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let stale = make_entry("g", "https://x.test/a", "stale", 10);
        db.put_entry(&stale).await.unwrap();

        let refreshed = make_entry("g", "https://x.test/a", "refreshed", 50);
        assert!(db.replace_entry_if_unchanged(&refreshed, 10, || true).await.unwrap());

        // A second refresh that observed the old row must not clobber the newer one.
        let late = make_entry("g", "https://x.test/a", "late", 60);
        assert!(!db.replace_entry_if_unchanged(&late, 10, || true).await.unwrap());

        let got = db.get_entry("g", &stale.key).await.unwrap().unwrap();
        assert_eq!(got.body, b"refreshed");
    }

    #[tokio::test]
    async fn test_replace_if_unchanged_does_not_resurrect() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("g", "https://x.test/a", "v", 10);
        db.put_entry(&entry).await.unwrap();
        db.delete_entry("g", &entry.key).await.unwrap();

        assert!(!db.replace_entry_if_unchanged(&entry, 10, || true).await.unwrap());
        assert!(db.get_entry("g", &entry.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_by_path_prefixes() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for url in [
            "https://x.test/api/entries",
            "https://x.test/api/entries/7?expand=1",
            "https://x.test/api/summary",
            "https://x.test/api/products",
            "https://x.test/api/entries_archive",
        ] {
            db.put_entry(&make_entry("api", url, "{}", 1)).await.unwrap();
        }
        db.put_entry(&make_entry("runtime", "https://x.test/api/entries", "{}", 1))
            .await
            .unwrap();

        let deleted = db
            .delete_by_path_prefixes("api", &["/api/entries/".into(), "/api/summary".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let left: Vec<String> = db.list_entries("api").await.unwrap().into_iter().map(|e| e.url).collect();
        assert!(left.contains(&"https://x.test/api/entries".to_string()));
        assert!(left.contains(&"https://x.test/api/products".to_string()));
        assert_eq!(db.count_entries("runtime").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trim_generation_drops_oldest() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for (i, url) in ["https://x.test/1", "https://x.test/2", "https://x.test/3"].iter().enumerate() {
            db.put_entry(&make_entry("runtime", url, "x", i as i64)).await.unwrap();
        }

        assert_eq!(db.trim_generation("runtime", 2).await.unwrap(), 1);
        assert!(db.get_entry("runtime", &CacheKey::get("https://x.test/1")).await.unwrap().is_none());
        assert_eq!(db.trim_generation("runtime", 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(&make_entry("api", "https://x.test/old", "x", 100)).await.unwrap();
        db.put_entry(&make_entry("api", "https://x.test/new", "x", 900)).await.unwrap();

        assert_eq!(db.purge_older_than("api", 500).await.unwrap(), 1);
        assert_eq!(db.count_entries("api").await.unwrap(), 1);
    }

    #[test]
    fn test_freshness_is_inclusive() {
        let entry = make_entry("g", "https://x.test/a", "", 0);
        assert!(entry.is_fresh(300_000, Some(300_000)));
        assert!(!entry.is_fresh(300_001, Some(300_000)));
        assert!(entry.is_fresh(i64::MAX, None));
    }

    #[tokio::test]
    async fn test_put_entry_if_checks_guard_at_write_time() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("g", "https://x.test/a", "body", 10);

        assert!(!db.put_entry_if(&entry, || false).await.unwrap());
        assert!(db.get_entry("g", &entry.key).await.unwrap().is_none());

        assert!(db.put_entry_if(&entry, || true).await.unwrap());
        assert_eq!(db.get_entry("g", &entry.key).await.unwrap().unwrap(), entry);

        let refreshed = make_entry("g", "https://x.test/a", "refreshed", 20);
        assert!(!db.replace_entry_if_unchanged(&refreshed, 10, || false).await.unwrap());
        assert_eq!(db.get_entry("g", &entry.key).await.unwrap().unwrap().body, b"body");
    }

    #[tokio::test]
    async fn test_put_entries_batch() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entries = vec![
            make_entry("shelf-precache-v1", "https://x.test/", "shell", 1),
            make_entry("shelf-precache-v1", "https://x.test/app.js", "js", 1),
        ];
        db.put_entries(entries).await.unwrap();
        assert_eq!(db.count_entries("shelf-precache-v1").await.unwrap(), 2);
    }
}
