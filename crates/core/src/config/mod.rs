//! Worker configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (OFFCACHE_*)
//! 2. TOML config file (if OFFCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::GenerationId;

mod validation;

pub use validation::ConfigError;

/// Worker configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (OFFCACHE_*)
/// 2. TOML config file (if OFFCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Origin that asset paths and intercepted paths are resolved against.
    ///
    /// Set via OFFCACHE_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Prefix for generation ids derived from `build_timestamp`.
    ///
    /// Set via OFFCACHE_CACHE_PREFIX environment variable.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Build timestamp of the deployed asset set, in Unix seconds.
    ///
    /// Set via OFFCACHE_BUILD_TIMESTAMP environment variable.
    #[serde(default)]
    pub build_timestamp: Option<i64>,

    /// Explicit generation id; overrides `cache_prefix`/`build_timestamp`.
    ///
    /// Set via OFFCACHE_GENERATION_ID environment variable.
    #[serde(default)]
    pub generation_id: Option<String>,

    /// Ordered asset paths fetched into a new generation at install.
    ///
    /// Set via OFFCACHE_PRECACHE_ASSETS environment variable or the TOML file.
    #[serde(default = "default_precache_assets")]
    pub precache_assets: Vec<String>,

    /// Path to SQLite cache database.
    ///
    /// Set via OFFCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via OFFCACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via OFFCACHE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via OFFCACHE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum concurrent fetches during install.
    ///
    /// Set via OFFCACHE_PRECACHE_CONCURRENCY environment variable.
    #[serde(default = "default_precache_concurrency")]
    pub precache_concurrency: usize,
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_cache_prefix() -> String {
    "offcache".into()
}

fn default_precache_assets() -> Vec<String> {
    vec!["/".into()]
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./offcache.sqlite")
}

fn default_user_agent() -> String {
    "offcache/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_precache_concurrency() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache_prefix: default_cache_prefix(),
            build_timestamp: None,
            generation_id: None,
            precache_assets: default_precache_assets(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            precache_concurrency: default_precache_concurrency(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `OFFCACHE_`
    /// 2. TOML file from `OFFCACHE_CONFIG_FILE` (if set)
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

        if let Ok(config_path) = std::env::var("OFFCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OFFCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Resolve the generation id for this deployment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if neither `generation_id` nor
    /// `build_timestamp` is set.
    pub fn generation_id(&self) -> Result<GenerationId, ConfigError> {
        if let Some(id) = &self.generation_id {
            return Ok(GenerationId::new(id.clone()));
        }

        self.build_timestamp
            .map(|ts| GenerationId::from_build(&self.cache_prefix, ts))
            .ok_or_else(|| ConfigError::Missing {
                field: "generation_id".into(),
                hint: "Set OFFCACHE_GENERATION_ID or OFFCACHE_BUILD_TIMESTAMP for each deployment".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.origin, "http://localhost:8080");
        assert_eq!(config.cache_prefix, "offcache");
        assert_eq!(config.precache_assets, vec!["/".to_string()]);
        assert_eq!(config.db_path, PathBuf::from("./offcache.sqlite"));
        assert_eq!(config.user_agent, "offcache/0.1");
        assert_eq!(config.max_bytes, 5_242_880);
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.precache_concurrency, 4);
        assert!(config.build_timestamp.is_none());
        assert!(config.generation_id.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_generation_id_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.generation_id(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_generation_id_from_build_timestamp() {
        let config = AppConfig { cache_prefix: "histali".into(), build_timestamp: Some(1768123469), ..Default::default() };
        assert_eq!(config.generation_id().unwrap().as_str(), "histali-1768123469");
    }

    #[test]
    fn test_generation_id_explicit_wins() {
        let config =
            AppConfig { generation_id: Some("g2".into()), build_timestamp: Some(1768123469), ..Default::default() };
        assert_eq!(config.generation_id().unwrap().as_str(), "g2");
    }

    #[test]
    fn test_load_layers_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "offcache.toml",
                r#"
                origin = "https://example.com"
                precache_assets = ["/", "/index.html", "/manifest.json"]
                timeout_ms = 5000
                "#,
            )?;
            jail.set_env("OFFCACHE_CONFIG_FILE", "offcache.toml");
            jail.set_env("OFFCACHE_TIMEOUT_MS", "7000");
            jail.set_env("OFFCACHE_GENERATION_ID", "site-42");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.origin, "https://example.com");
            assert_eq!(config.precache_assets.len(), 3);
            assert_eq!(config.timeout_ms, 7000);
            assert_eq!(config.generation_id().map_err(|e| e.to_string())?.as_str(), "site-42");
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("OFFCACHE_PRECACHE_CONCURRENCY", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }
}
