//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SHELF_*)
//! 2. TOML config file (if SHELF_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SHELF_*)
/// 2. TOML config file (if SHELF_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the origin API the engine sits in front of.
    ///
    /// Set via SHELF_ORIGIN_URL environment variable.
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// Path to SQLite cache database.
    ///
    /// Set via SHELF_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Deploy tag. Changing it installs a new cache generation set.
    ///
    /// Set via SHELF_VERSION environment variable.
    #[serde(default = "default_version")]
    pub version: String,

    /// User-Agent string for origin requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Origin request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body bytes accepted from the origin.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Freshness window for read-heavy API responses, in seconds.
    #[serde(default = "default_api_ttl_secs")]
    pub api_ttl_secs: u64,

    /// Replay attempts before a pending action is exhausted.
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: u32,

    /// First background retry delay after a failed replay pass.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound for the background retry delay.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Entry bound for the `runtime` generation.
    #[serde(default = "default_max_runtime_entries")]
    pub max_runtime_entries: usize,

    /// Entry bound for the `image` generation.
    #[serde(default = "default_max_image_entries")]
    pub max_image_entries: usize,

    /// Asset paths fetched into `precache` when a new version installs.
    #[serde(default = "default_precache_manifest")]
    pub precache_manifest: Vec<String>,

    /// Path polled on the origin to detect connectivity.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Connectivity poll interval in milliseconds. 0 disables polling.
    #[serde(default)]
    pub probe_interval_ms: u64,

    /// HTML served to navigations when neither network nor cache can answer.
    #[serde(default = "default_offline_document")]
    pub offline_document: String,
}

fn default_origin_url() -> String {
    "http://localhost:3000".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./shelf-cache.sqlite")
}

fn default_version() -> String {
    "v1".into()
}

fn default_user_agent() -> String {
    "shelf/0.1".into()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_api_ttl_secs() -> u64 {
    300
}

fn default_max_replay_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_max_ms() -> u64 {
    60_000
}

fn default_max_runtime_entries() -> usize {
    200
}

fn default_max_image_entries() -> usize {
    500
}

fn default_precache_manifest() -> Vec<String> {
    vec!["/".into(), "/index.html".into(), "/manifest.json".into()]
}

fn default_probe_path() -> String {
    "/api/health".into()
}

fn default_offline_document() -> String {
    "<!doctype html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
     <body><h1>You are offline</h1><p>This page is not available offline. \
     Changes you make will sync when the connection returns.</p></body></html>"
        .into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin_url: default_origin_url(),
            db_path: default_db_path(),
            version: default_version(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            api_ttl_secs: default_api_ttl_secs(),
            max_replay_attempts: default_max_replay_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_runtime_entries: default_max_runtime_entries(),
            max_image_entries: default_max_image_entries(),
            precache_manifest: default_precache_manifest(),
            probe_path: default_probe_path(),
            probe_interval_ms: 0,
            offline_document: default_offline_document(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// API freshness window.
    pub fn api_ttl(&self) -> Duration {
        Duration::from_secs(self.api_ttl_secs)
    }

    /// Connectivity poll interval, if polling is enabled.
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_ms > 0).then(|| Duration::from_millis(self.probe_interval_ms))
    }

    /// Background retry delay after `failures` consecutive failed passes.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let factor = 1u64.checked_shl(failures.min(32)).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_base_ms.saturating_mul(factor).min(self.retry_max_ms))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SHELF_`
    /// 2. TOML file from `SHELF_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SHELF_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SHELF_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./shelf-cache.sqlite"));
        assert_eq!(config.user_agent, "shelf/0.1");
        assert_eq!(config.timeout_ms, 15_000);
        assert_eq!(config.api_ttl_secs, 300);
        assert_eq!(config.max_replay_attempts, 5);
        assert_eq!(config.probe_interval(), None);
        assert!(config.precache_manifest.contains(&"/".to_string()));
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(15_000));
        assert_eq!(config.api_ttl(), Duration::from_secs(300));

        let polling = AppConfig { probe_interval_ms: 5_000, ..Default::default() };
        assert_eq!(polling.probe_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = AppConfig { retry_base_ms: 1_000, retry_max_ms: 10_000, ..Default::default() };
        assert_eq!(config.retry_delay(0), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(1), Duration::from_millis(2_000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(8_000));
        assert_eq!(config.retry_delay(4), Duration::from_millis(10_000));
        assert_eq!(config.retry_delay(200), Duration::from_millis(10_000));
    }
}
