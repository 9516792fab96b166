//! Content-addressed cache keys.
//!
//! A key is `(method, canonical_url)`. Only GET requests are cacheable, so
//! constructing a key for any other method yields `None`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Build a key for a request. Returns `None` for non-GET methods.
    pub fn new(method: &str, canonical_url: &str) -> Option<Self> {
        method
            .eq_ignore_ascii_case("GET")
            .then(|| Self { method: "GET".to_string(), url: canonical_url.to_string() })
    }

    /// Key for a GET of `canonical_url`.
    pub fn get(canonical_url: &str) -> Self {
        Self { method: "GET".to_string(), url: canonical_url.to_string() }
    }

    /// Stable hex digest used as the storage key.
    pub fn hash(&self) -> String {
        compute_cache_key(&self.method, &self.url)
    }

    /// Path component of the URL (no query), used for prefix invalidation.
    pub fn path(&self) -> &str {
        path_of(&self.url)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Compute the content-addressed digest for a method and canonical URL.
pub fn compute_cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the path from an absolute URL string.
pub fn path_of(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => url,
    };
    let Some(start) = after_scheme.find('/') else {
        return "/";
    };
    let rest = &after_scheme[start..];
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    &rest[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_get_is_cacheable() {
        assert!(CacheKey::new("GET", "https://api.example.com/a").is_some());
        assert!(CacheKey::new("get", "https://api.example.com/a").is_some());
        assert!(CacheKey::new("POST", "https://api.example.com/a").is_none());
        assert!(CacheKey::new("DELETE", "https://api.example.com/a").is_none());
    }

    #[test]
    fn test_hash_stability() {
        let a = CacheKey::get("https://example.com/api/entries");
        let b = CacheKey::new("GET", "https://example.com/api/entries").unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_depends_on_url() {
        let a = compute_cache_key("GET", "https://example.com/a?x=1");
        let b = compute_cache_key("GET", "https://example.com/a?x=2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_cache_key("GET", "https://example.com");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_path_of() {
        assert_eq!(path_of("https://example.com/api/entries?page=2"), "/api/entries");
        assert_eq!(path_of("https://example.com"), "/");
        assert_eq!(path_of("http://localhost:3000/"), "/");
        assert_eq!(path_of("https://example.com/a/b#frag"), "/a/b");
    }
}
