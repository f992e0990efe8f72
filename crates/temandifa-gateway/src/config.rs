//! Gateway configuration.
//!
//! One TOML file with a section per component, overlaid by environment
//! variables:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [redis]
//! url = "redis://localhost:6379"
//!
//! [cache.ttl]
//! vqa = "24h"
//!
//! [breaker.defaults]
//! failure_ratio = 0.6
//!
//! [rate_limit.public]
//! limit = 60
//! window = "60s"
//!
//! [auth]
//! signing_secret = "..."
//!
//! [shutdown]
//! grace = "5s"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use temandifa_auth::TokenConfig;
use temandifa_cache::CacheConfig;
use temandifa_resilience::{BreakerSettings, RateLimitSettings};
use temandifa_store::RedisConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "temandifa.toml";

/// Prefix for environment overrides, e.g. `TEMANDIFA__RATE_LIMIT__PUBLIC__LIMIT=100`.
pub const ENV_PREFIX: &str = "TEMANDIFA";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub auth: TokenConfig,
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        self.redis.validate()?;
        self.cache.validate()?;
        self.breaker.validate()?;
        self.rate_limit.validate()?;
        self.auth.validate()?;

        if self.shutdown.grace.is_zero() {
            return Err("shutdown.grace must be > 0".into());
        }
        Ok(())
    }

    /// Render as TOML, for `--print-default-config`.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("config serialize error: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long shutdown waits for background work (cache writes, token
    /// cleanup) before abandoning it.
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
        }
    }
}

pub mod loader {
    use super::{AppConfig, DEFAULT_CONFIG_FILE, ENV_PREFIX};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Load, overlay environment variables and validate.
    ///
    /// A missing file is not an error: defaults and environment variables
    /// still apply.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., TEMANDIFA__AUTH__SIGNING_SECRET=...
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.auth.signing_secret = "0123456789abcdef0123456789abcdef".into();
        cfg
    }

    #[test]
    fn test_defaults_need_only_a_secret() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut cfg = valid();
        cfg.logging.level = "verbose".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("logging.level"));
    }

    #[test]
    fn test_rejects_bad_failure_ratio() {
        let mut cfg = valid();
        cfg.breaker.defaults.failure_ratio = 1.5;
        assert!(cfg.validate().unwrap_err().contains("failure_ratio"));
    }

    #[test]
    fn test_rejects_zero_grace() {
        let mut cfg = valid();
        cfg.shutdown.grace = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_default_config_renders_and_parses_back() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[rate_limit.public]"));
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.rate_limit, RateLimitSettings::default());
        assert_eq!(parsed.shutdown.grace, Duration::from_secs(5));
    }
}
