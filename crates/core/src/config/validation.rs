//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `origin_url` or `version` is empty, and
    /// `ConfigError::Invalid` if:
    /// - `origin_url` is not an absolute http(s) URL
    /// - `version` contains characters other than `[A-Za-z0-9._-]`
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_bytes` or `max_replay_attempts` is 0
    /// - `retry_base_ms` exceeds `retry_max_ms`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "origin_url".into(),
                hint: "Set SHELF_ORIGIN_URL environment variable".into(),
            });
        }
        let scheme_ok = self.origin_url.starts_with("http://") || self.origin_url.starts_with("https://");
        if !scheme_ok {
            return Err(ConfigError::Invalid {
                field: "origin_url".into(),
                reason: "must be an absolute http(s) URL".into(),
            });
        }

        if self.version.is_empty() {
            return Err(ConfigError::Missing {
                field: "version".into(),
                hint: "Set SHELF_VERSION to the deploy tag".into(),
            });
        }
        if !self.version.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            return Err(ConfigError::Invalid {
                field: "version".into(),
                reason: "may only contain letters, digits, '.', '_' and '-'".into(),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }

        if self.max_replay_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_replay_attempts".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.retry_base_ms > self.retry_max_ms {
            return Err(ConfigError::Invalid {
                field: "retry_base_ms".into(),
                reason: "must not exceed retry_max_ms".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.precache_manifest.is_empty() {
            tracing::warn!("precache_manifest is empty; navigations have no app shell fallback");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_origin() {
        let config = AppConfig { origin_url: "  ".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "origin_url"));
    }

    #[test]
    fn test_validate_relative_origin() {
        let config = AppConfig { origin_url: "api.example.com".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "origin_url"));
    }

    #[test]
    fn test_validate_version_charset() {
        let config = AppConfig { version: "v1 beta".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "version"));

        let config = AppConfig { version: "2024.10.1-rc_2".into(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_attempts() {
        let config = AppConfig { max_replay_attempts: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_replay_attempts"));
    }

    #[test]
    fn test_validate_retry_window() {
        let config = AppConfig { retry_base_ms: 5_000, retry_max_ms: 1_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retry_base_ms"));
    }
}
