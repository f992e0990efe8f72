//! # temandifa-store
//!
//! Key-value store abstraction shared by the cache, rate limiter and token
//! manager.
//!
//! ## Modules
//!
//! - [`traits`] - the `KeyValueStore` contract
//! - [`redis_store`] - Redis implementation on a deadpool pool
//! - [`memory`] - process-local implementation on DashMap
//! - [`unavailable`] - stand-in used when no store is configured
//! - [`config`] - Redis settings and the connection factory
//! - [`keys`] - key-space prefixes

pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod traits;
pub mod unavailable;

pub use config::{RedisConfig, StoreFallback, connect_store};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{KeyValueStore, ScanPage, StoreBackend, WindowProbe};
pub use unavailable::UnavailableStore;

use std::time::Duration;

/// Expiry in whole milliseconds. Sub-millisecond TTLs are rejected since
/// Redis refuses a zero expiry.
pub(crate) fn ttl_millis(ttl: Duration) -> StoreResult<u64> {
    match u64::try_from(ttl.as_millis()) {
        Ok(0) => Err(StoreError::command("invalid expire time: ttl must be >= 1ms")),
        Ok(ms) => Ok(ms),
        Err(_) => Err(StoreError::command("invalid expire time: ttl too large")),
    }
}
