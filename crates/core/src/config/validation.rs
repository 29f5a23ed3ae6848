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

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an absolute http(s) URL
    /// - any `precache_assets` entry does not start with `/`
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `precache_concurrency` is 0 or exceeds 32
    /// - `user_agent`, `cache_prefix` or an explicit `generation_id` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = url::Url::parse(&self.origin).map_err(|e| invalid("origin", e.to_string()))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(invalid("origin", format!("unsupported scheme: {}", origin.scheme())));
        }

        if let Some(asset) = self.precache_assets.iter().find(|a| !a.starts_with('/')) {
            return Err(invalid("precache_assets", format!("path must start with '/': {asset}")));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.precache_concurrency == 0 || self.precache_concurrency > 32 {
            return Err(invalid("precache_concurrency", "must be between 1 and 32"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.cache_prefix.is_empty() {
            return Err(invalid("cache_prefix", "must not be empty"));
        }
        if self.generation_id.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("generation_id", "must not be empty when set"));
        }

        if self.precache_assets.is_empty() {
            tracing::warn!("precache_assets is empty; install will commit an empty generation");
        }

        Ok(())
    }
}
