//! The key-value store contract.
//!
//! Components never see Redis types. They talk to an `Arc<dyn KeyValueStore>`
//! which the composition root builds once and passes down.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::StoreResult;

/// Which backend is serving a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared Redis instance.
    Redis,
    /// Process-local maps. Not shared across instances.
    Memory,
    /// No store. Every operation fails with `StoreError::Disabled`.
    Unavailable,
}

impl StoreBackend {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a keyspace scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call. `0` means the scan is complete.
    pub cursor: u64,
    /// Keys matched in this page. May be empty even when `cursor != 0`.
    pub keys: Vec<String>,
}

/// A single sliding-window probe.
///
/// Applied as one atomic unit: prune entries with score `<= window_start`,
/// insert `member` at `score`, count, and refresh the set's expiry to `ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowProbe {
    /// Score for the new entry (Unix nanoseconds).
    pub score: i64,
    /// Entries scored at or below this are discarded.
    pub window_start: i64,
    /// Unique member for the new entry.
    pub member: String,
    /// Expiry for the whole set.
    pub ttl: Duration,
}

/// Asynchronous key-value store shared by the cache, rate limiter and token
/// manager.
///
/// Implementations must be safe for arbitrary concurrent use. Operations
/// documented as atomic must be atomic with respect to every other caller of
/// the same store, including other processes for shared backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend serving this handle.
    fn backend(&self) -> StoreBackend;

    /// Round-trip check used by health probes and stats.
    async fn ping(&self) -> StoreResult<()>;

    /// Get a byte value. `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Set a byte value with expiry, replacing any existing value.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Set a byte value with expiry only if the key does not exist.
    ///
    /// Atomic. Returns `true` if this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete several keys in one round-trip. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64>;

    /// Returns `true` if the key exists and has not expired.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Set or refresh the expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Add a member to a set, creating it if needed.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All members of a set. Empty if the set does not exist.
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// One bounded page of keys matching a glob `pattern`.
    ///
    /// Start with cursor `0`; continue until the returned cursor is `0`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage>;

    /// Number of keys in the store.
    async fn db_size(&self) -> StoreResult<u64>;

    /// Apply a sliding-window probe atomically and return the entry count
    /// after insertion.
    async fn window_probe(&self, key: &str, probe: &WindowProbe) -> StoreResult<u64>;

    /// Drop expired entries the backend does not evict on its own. Returns
    /// how many were removed.
    ///
    /// Backends with native expiry keep the default, which does nothing.
    fn purge_expired(&self) -> usize {
        0
    }
}
