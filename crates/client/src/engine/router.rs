//! Request classification.
//!
//! An ordered table of `(pattern, method scope) -> strategy` rules. The first
//! matching rule wins; nothing matching falls through to NetworkFirst against
//! the `runtime` generation. Patterns are matched against the URL path.

use regex::Regex;
use reqwest::Method;
use shelf_core::GenerationKind;
use std::time::Duration;
use url::Url;

use crate::fetch::same_origin;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    Bypass,
}

/// Which methods a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodScope {
    GetOnly,
    /// Anything other than GET/HEAD/OPTIONS.
    Mutating,
    Any,
}

impl MethodScope {
    fn admits(&self, method: &Method) -> bool {
        match self {
            MethodScope::GetOnly => *method == Method::GET,
            MethodScope::Mutating => is_mutating(method),
            MethodScope::Any => true,
        }
    }
}

/// Whether a method changes origin state.
pub fn is_mutating(method: &Method) -> bool {
    !(*method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS)
}

/// One routing rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: String,
    pub pattern: Regex,
    pub method_scope: MethodScope,
    pub strategy: Strategy,
    pub generation: GenerationKind,
    /// Freshness window for CacheFirst; `None` means never stale.
    pub ttl: Option<Duration>,
    /// Serve the app shell / offline document when NetworkFirst has nothing.
    pub navigation_fallback: bool,
    /// Queue the request for replay if the origin is unreachable.
    pub replayable: bool,
}

impl RouteRule {
    /// Build a rule. Panics on an invalid pattern; rule tables are static.
    pub fn new(name: &str, pattern: &str, method_scope: MethodScope, strategy: Strategy, generation: GenerationKind) -> Self {
        Self {
            name: name.to_string(),
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid route pattern {pattern}: {e}")),
            method_scope,
            strategy,
            generation,
            ttl: None,
            navigation_fallback: false,
            replayable: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_navigation_fallback(mut self) -> Self {
        self.navigation_fallback = true;
        self
    }

    pub fn replayable(mut self) -> Self {
        self.replayable = true;
        self
    }

    fn matches(&self, path: &str, method: &Method) -> bool {
        self.method_scope.admits(method) && self.pattern.is_match(path)
    }
}

/// Ordered rule table.
#[derive(Debug, Clone)]
pub struct PatternRouter {
    origin: Url,
    rules: Vec<RouteRule>,
    fallback: RouteRule,
    foreign: RouteRule,
}

impl PatternRouter {
    /// Router over a custom rule table.
    pub fn new(origin: Url, rules: Vec<RouteRule>) -> Self {
        Self {
            origin,
            rules,
            fallback: RouteRule::new("default", ".*", MethodScope::Any, Strategy::NetworkFirst, GenerationKind::Runtime),
            foreign: RouteRule::new("cross-origin", ".*", MethodScope::Any, Strategy::Bypass, GenerationKind::Runtime),
        }
    }

    /// Router with the standard rule table.
    ///
    /// Precedence:
    /// 1. identity endpoints: bypass, never cached or queued
    /// 2. other mutations: bypass, queued when offline
    /// 3. read-heavy API queries: cache-first for `api_ttl`
    /// 4. images: cache-first, no TTL
    /// 5. bundled static assets: cache-first in `precache`, no TTL
    /// 6. remaining API reads: network-first in `api`
    /// 7. documents: network-first with offline fallback
    pub fn with_defaults(origin: Url, api_ttl: Duration) -> Self {
        let rules = vec![
            RouteRule::new(
                "identity",
                r"^/(?:api/)?(?:auth|login|logout|register|session|sessions|token|me)(?:/|$)",
                MethodScope::Any,
                Strategy::Bypass,
                GenerationKind::Runtime,
            ),
            RouteRule::new("mutation", ".*", MethodScope::Mutating, Strategy::Bypass, GenerationKind::Api).replayable(),
            RouteRule::new(
                "api-query",
                r"^/api/(?:search|summary|summaries|listings|entries|products|categories|stats)(?:/|$)",
                MethodScope::GetOnly,
                Strategy::CacheFirst,
                GenerationKind::Api,
            )
            .with_ttl(api_ttl),
            RouteRule::new(
                "image",
                r"(?i)(?:^/images/|\.(?:png|jpe?g|gif|webp|avif|svg|ico|bmp)$)",
                MethodScope::GetOnly,
                Strategy::CacheFirst,
                GenerationKind::Image,
            ),
            RouteRule::new(
                "static",
                r"(?i)(?:^/static/|\.(?:js|mjs|css|woff2?|ttf|otf|map|webmanifest)$)",
                MethodScope::GetOnly,
                Strategy::CacheFirst,
                GenerationKind::Precache,
            ),
            RouteRule::new("api-read", r"^/api/", MethodScope::GetOnly, Strategy::NetworkFirst, GenerationKind::Api),
            RouteRule::new("document", r"^/[^.]*$", MethodScope::GetOnly, Strategy::NetworkFirst, GenerationKind::Runtime)
                .with_navigation_fallback(),
        ];

        Self::new(origin, rules)
    }

    /// Classify a request. Pure and infallible.
    pub fn classify(&self, url: &Url, method: &Method) -> &RouteRule {
        if !same_origin(url, &self.origin) {
            return &self.foreign;
        }

        let path = url.path();
        self.rules
            .iter()
            .find(|rule| rule.matches(path, method))
            .unwrap_or(&self.fallback)
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> PatternRouter {
        PatternRouter::with_defaults(Url::parse("https://app.test").unwrap(), Duration::from_secs(300))
    }

    fn classify(path: &str, method: Method) -> (String, Strategy, GenerationKind) {
        let router = router();
        let url = Url::parse("https://app.test").unwrap().join(path).unwrap();
        let rule = router.classify(&url, &method);
        (rule.name.clone(), rule.strategy, rule.generation)
    }

    #[test]
    fn test_identity_endpoints_bypass_for_every_method() {
        for method in [Method::GET, Method::POST] {
            let (name, strategy, _) = classify("/api/auth/login", method);
            assert_eq!(name, "identity");
            assert_eq!(strategy, Strategy::Bypass);
        }
        assert_eq!(classify("/logout", Method::POST).0, "identity");
        assert_eq!(classify("/api/me", Method::GET).0, "identity");
    }

    #[test]
    fn test_mutations_bypass_and_replay() {
        let router = router();
        let url = Url::parse("https://app.test/api/entries").unwrap();
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let rule = router.classify(&url, &method);
            assert_eq!(rule.name, "mutation");
            assert_eq!(rule.strategy, Strategy::Bypass);
            assert!(rule.replayable);
        }

        let identity = router.classify(&Url::parse("https://app.test/api/auth/login").unwrap(), &Method::POST);
        assert!(!identity.replayable);
    }

    #[test]
    fn test_read_heavy_queries_are_cache_first_with_ttl() {
        let router = router();
        let url = Url::parse("https://app.test/api/summary?month=2024-05").unwrap();
        let rule = router.classify(&url, &Method::GET);
        assert_eq!(rule.strategy, Strategy::CacheFirst);
        assert_eq!(rule.generation, GenerationKind::Api);
        assert_eq!(rule.ttl, Some(Duration::from_secs(300)));

        assert_eq!(classify("/api/entries/42", Method::GET).0, "api-query");
        assert_eq!(classify("/api/search", Method::GET).0, "api-query");
    }

    #[test]
    fn test_images_and_static_assets() {
        let (name, strategy, generation) = classify("/uploads/receipt-ab12.JPG", Method::GET);
        assert_eq!(name, "image");
        assert_eq!(strategy, Strategy::CacheFirst);
        assert_eq!(generation, GenerationKind::Image);

        let (name, _, generation) = classify("/assets/app.3f9c.js", Method::GET);
        assert_eq!(name, "static");
        assert_eq!(generation, GenerationKind::Precache);
        assert!(router().rules().iter().find(|r| r.name == "static").unwrap().ttl.is_none());
    }

    #[test]
    fn test_documents_have_navigation_fallback() {
        let router = router();
        let rule = router.classify(&Url::parse("https://app.test/dashboard").unwrap(), &Method::GET);
        assert_eq!(rule.name, "document");
        assert_eq!(rule.strategy, Strategy::NetworkFirst);
        assert!(rule.navigation_fallback);
    }

    #[test]
    fn test_other_api_reads_are_network_first_in_api() {
        let (name, strategy, generation) = classify("/api/budgets", Method::GET);
        assert_eq!(name, "api-read");
        assert_eq!(strategy, Strategy::NetworkFirst);
        assert_eq!(generation, GenerationKind::Api);
    }

    #[test]
    fn test_unmatched_defaults_to_network_first_runtime() {
        let (name, strategy, generation) = classify("/feed.xml", Method::GET);
        assert_eq!(name, "default");
        assert_eq!(strategy, Strategy::NetworkFirst);
        assert_eq!(generation, GenerationKind::Runtime);

        assert_eq!(classify("/api/entries", Method::HEAD).0, "default");
    }

    #[test]
    fn test_cross_origin_bypasses() {
        let router = router();
        let rule = router.classify(&Url::parse("https://cdn.other.test/logo.png").unwrap(), &Method::GET);
        assert_eq!(rule.name, "cross-origin");
        assert_eq!(rule.strategy, Strategy::Bypass);
        assert!(!rule.replayable);
    }

    #[test]
    fn test_first_match_wins() {
        let origin = Url::parse("https://app.test").unwrap();
        let rules = vec![
            RouteRule::new("first", "^/a", MethodScope::Any, Strategy::Bypass, GenerationKind::Runtime),
            RouteRule::new("second", "^/a/b", MethodScope::Any, Strategy::CacheFirst, GenerationKind::Api),
        ];
        let router = PatternRouter::new(origin, rules);
        let rule = router.classify(&Url::parse("https://app.test/a/b").unwrap(), &Method::GET);
        assert_eq!(rule.name, "first");
    }
}
