//! Configuration for settings caches.

use crate::{AlmanacError, AlmanacResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Behavior switches for a `NameValueCache`.
///
/// Loadable from TOML (unknown keys rejected) or from `ALMANAC_CACHE_*`
/// environment variables. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Keep self-user values locally between generation bumps.
    pub caching_enabled: bool,
    /// Ask the remote side for a generation tracker on self-user misses.
    pub track_generation: bool,
    /// Read through the `GET_`/`LIST_` call methods. Writes always use
    /// `PUT_`/`RESET_`.
    pub fast_path_enabled: bool,
    /// Fall back to a tabular query when the fast path is unavailable.
    pub fallback_query_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            caching_enabled: true,
            track_generation: true,
            fast_path_enabled: true,
            fallback_query_enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable local caching.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    /// Enable or disable generation tracking.
    pub fn with_generation_tracking(mut self, enabled: bool) -> Self {
        self.track_generation = enabled;
        self
    }

    /// Enable or disable the fast-path call methods.
    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path_enabled = enabled;
        self
    }

    /// Enable or disable the fallback query path.
    pub fn with_fallback_query(mut self, enabled: bool) -> Self {
        self.fallback_query_enabled = enabled;
        self
    }

    /// Whether a generation tracker should be requested at all.
    pub fn wants_tracker(&self) -> bool {
        self.caching_enabled && self.track_generation
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables (`true`/`false`):
    /// - `ALMANAC_CACHE_ENABLED` (default: true)
    /// - `ALMANAC_CACHE_TRACK_GENERATION` (default: true)
    /// - `ALMANAC_CACHE_FAST_PATH` (default: true)
    /// - `ALMANAC_CACHE_FALLBACK_QUERY` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            caching_enabled: std::env::var("ALMANAC_CACHE_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.caching_enabled),
            track_generation: std::env::var("ALMANAC_CACHE_TRACK_GENERATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.track_generation),
            fast_path_enabled: std::env::var("ALMANAC_CACHE_FAST_PATH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fast_path_enabled),
            fallback_query_enabled: std::env::var("ALMANAC_CACHE_FALLBACK_QUERY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fallback_query_enabled),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> AlmanacResult<Self> {
        let config: CacheConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: &Path) -> AlmanacResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - at least one remote read path is enabled
    /// - generation tracking is only requested together with caching
    pub fn validate(&self) -> AlmanacResult<()> {
        if !self.fast_path_enabled && !self.fallback_query_enabled {
            return Err(AlmanacError::Config(ConfigError::InvalidValue {
                field: "fallback_query_enabled".to_string(),
                value: self.fallback_query_enabled.to_string(),
                reason: "at least one of fast_path_enabled and fallback_query_enabled must be set"
                    .to_string(),
            }));
        }

        if self.track_generation && !self.caching_enabled {
            return Err(AlmanacError::Config(ConfigError::IncompatibleOptions {
                option_a: "track_generation".to_string(),
                option_b: "caching_enabled = false".to_string(),
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.wants_tracker());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new()
            .with_caching(false)
            .with_generation_tracking(false)
            .with_fast_path(false)
            .with_fallback_query(true);

        assert!(!config.caching_enabled);
        assert!(!config.track_generation);
        assert!(!config.fast_path_enabled);
        assert!(config.fallback_query_enabled);
        assert!(!config.wants_tracker());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_no_read_path() {
        let config = CacheConfig::new()
            .with_fast_path(false)
            .with_fallback_query(false);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AlmanacError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_tracking_without_caching() {
        let config = CacheConfig::new().with_caching(false);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AlmanacError::Config(ConfigError::IncompatibleOptions { .. })
        ));
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = CacheConfig::from_toml_str("fallback_query_enabled = false\n").unwrap();
        assert!(config.caching_enabled);
        assert!(config.fast_path_enabled);
        assert!(!config.fallback_query_enabled);
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        let err = CacheConfig::from_toml_str("cache_size = 10\n").unwrap_err();
        assert!(matches!(err, AlmanacError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = CacheConfig::from_path(Path::new("/nonexistent/almanac.toml")).unwrap_err();
        assert!(matches!(err, AlmanacError::Config(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("almanac.toml");
        std::fs::write(&path, "caching_enabled = false\ntrack_generation = false\n").unwrap();

        let config = CacheConfig::from_path(&path).unwrap();
        assert!(!config.caching_enabled);
        assert!(!config.track_generation);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("ALMANAC_CACHE_FALLBACK_QUERY", "false");
        std::env::set_var("ALMANAC_CACHE_FAST_PATH", "not-a-bool");
        let config = CacheConfig::from_env();
        std::env::remove_var("ALMANAC_CACHE_FALLBACK_QUERY");
        std::env::remove_var("ALMANAC_CACHE_FAST_PATH");

        assert!(!config.fallback_query_enabled);
        // Unparsable values keep the default.
        assert!(config.fast_path_enabled);
    }
}
