//! Store configuration and connection factory.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::memory::MemoryStore;
use crate::redis_store::RedisStore;
use crate::traits::KeyValueStore;
use crate::unavailable::UnavailableStore;

/// What to serve when Redis is disabled or unreachable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFallback {
    /// Process-local maps. Cache and limits still work, per instance.
    #[default]
    Memory,
    /// No store. Cache always misses, rate limiting fails open, and token
    /// revocation checks follow the configured revocation policy.
    None,
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis at all (gracefully degrades without it).
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379").
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Backend used when Redis cannot be used.
    #[serde(default)]
    pub fallback: StoreFallback,

    /// How often the in-memory fallback reclaims expired entries, in
    /// milliseconds.
    #[serde(default = "default_memory_sweep_interval_ms")]
    pub memory_sweep_interval_ms: u64,
}

fn default_redis_enabled() -> bool {
    true
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_memory_sweep_interval_ms() -> u64 {
    60_000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            fallback: StoreFallback::default(),
            memory_sweep_interval_ms: default_memory_sweep_interval_ms(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.url.trim().is_empty() {
            return Err("redis.url must be set when redis.enabled=true".into());
        }
        if self.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.timeout_ms == 0 {
            return Err("redis.timeout_ms must be > 0".into());
        }
        if self.memory_sweep_interval_ms == 0 {
            return Err("redis.memory_sweep_interval_ms must be > 0".into());
        }
        Ok(())
    }
}

/// Build the process-wide store.
///
/// Never fails: an unreachable Redis is logged and replaced by the configured
/// fallback so that callers degrade instead of crashing.
pub async fn connect_store(config: &RedisConfig) -> Arc<dyn KeyValueStore> {
    if !config.enabled {
        tracing::info!(fallback = ?config.fallback, "Redis disabled");
        return fallback_store(config.fallback);
    }

    tracing::info!(url = %redact_url(&config.url), "Connecting to Redis");

    match RedisStore::connect(config).await {
        Ok(store) => {
            tracing::info!("Connected to Redis");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                fallback = ?config.fallback,
                "Failed to connect to Redis. Continuing with fallback store."
            );
            fallback_store(config.fallback)
        }
    }
}

fn fallback_store(fallback: StoreFallback) -> Arc<dyn KeyValueStore> {
    match fallback {
        StoreFallback::Memory => MemoryStore::new_shared(),
        StoreFallback::None => Arc::new(UnavailableStore),
    }
}

/// Strip credentials from a connection URL before logging it.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
