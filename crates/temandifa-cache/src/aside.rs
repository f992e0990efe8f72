//! Cache-aside layer.
//!
//! Callers look a key up, compute on miss, then hand the result back with
//! [`CacheAside::set_async`]. The write runs as a tracked background task, so
//! it outlives the request that produced it but never outlives the shutdown
//! grace period.
//!
//! ## Failure policy
//!
//! Caching is an optimization. A missing or failing store turns every lookup
//! into a miss and every write into a logged no-op; nothing here returns a
//! store error on the request path.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use temandifa_core::{BackgroundTasks, DrainOutcome, OperationKind, metrics};
use temandifa_store::{KeyValueStore, StoreBackend, keys};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::fingerprint::fingerprint;

/// Snapshot of cache health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Backend serving the cache.
    pub backend: &'static str,
    /// Whether the store answered a ping.
    pub connected: bool,
    /// Keys in the store, when it could be counted.
    pub key_count: Option<u64>,
    /// Background writes not yet finished.
    pub pending_writes: usize,
}

/// Cache-aside layer over the shared store.
///
/// Cheap to clone; clones share the store, task registry and counters.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    tasks: BackgroundTasks,
    config: Arc<CacheConfig>,
    pending: Arc<AtomicUsize>,
}

/// Decrements the pending-write counter when a write task ends, however it ends.
struct PendingWrite(Arc<AtomicUsize>);

impl Drop for PendingWrite {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>, tasks: BackgroundTasks, config: CacheConfig) -> Self {
        Self {
            store,
            tasks,
            config: Arc::new(config),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deterministic key for `parts` under `prefix`.
    pub fn fingerprint(&self, prefix: &str, parts: &[&[u8]]) -> String {
        fingerprint(prefix, parts)
    }

    /// Configured TTL for results of `kind`.
    pub fn ttl_for(&self, kind: OperationKind) -> Duration {
        self.config.ttl.ttl_for(kind)
    }

    /// Look a key up. `None` is a miss; store failures are misses too.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let operation = operation_label(key);
        match self.store.get(key).await {
            Ok(Some(payload)) => {
                tracing::debug!(key = %key, "cache hit");
                metrics::record_cache_hit(operation);
                Some(payload)
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                metrics::record_cache_miss(operation);
                None
            }
            Err(e) => {
                if self.store.backend() != StoreBackend::Unavailable {
                    tracing::warn!(key = %key, error = %e, "cache GET failed, treating as miss");
                }
                metrics::record_cache_miss(operation);
                None
            }
        }
    }

    /// Look a key up and decode it as JSON. Undecodable entries are misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key).await?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached value is not valid JSON, ignoring");
                None
            }
        }
    }

    /// Write a value in the background.
    ///
    /// Returns immediately. The write is detached from the caller, so
    /// dropping the caller's future does not cancel it; it is bounded by
    /// `write_timeout` and by the shutdown drain.
    pub fn set_async(&self, key: String, payload: Vec<u8>, ttl: Duration) {
        if self.tasks.is_shutting_down() {
            tracing::debug!(key = %key, "shutting down, skipping cache write");
            metrics::record_cache_write_abandoned();
            return;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingWrite(self.pending.clone());
        let store = self.store.clone();
        let write_timeout = self.config.write_timeout;

        self.tasks.spawn("cache-write", async move {
            let _guard = guard;
            match tokio::time::timeout(write_timeout, store.set_ex(&key, &payload, ttl)).await {
                Ok(Ok(())) => {
                    tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
                }
                Ok(Err(e)) => {
                    if store.backend() != StoreBackend::Unavailable {
                        tracing::warn!(key = %key, error = %e, "cache SET failed");
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        key = %key,
                        timeout_ms = write_timeout.as_millis() as u64,
                        "cache SET timed out, abandoning write"
                    );
                    metrics::record_cache_write_abandoned();
                }
            }
        });
    }

    /// Write a result for `kind` with its configured TTL.
    pub fn set_async_for(&self, kind: OperationKind, key: String, payload: Vec<u8>) {
        self.set_async(key, payload, self.ttl_for(kind));
    }

    /// Serialize to JSON and write in the background.
    pub fn set_json_async<T: Serialize>(&self, key: String, value: &T, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.set_async(key, payload, ttl);
        Ok(())
    }

    /// Remove one entry. Returns `true` if it existed.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.delete(key).await?)
    }

    /// Delete every entry under `prefix`, scanning in bounded pages.
    ///
    /// Safe alongside live traffic: entries written after their page was
    /// scanned may survive. On a store failure the error carries the number
    /// of keys already deleted.
    pub async fn clear_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        if prefix.is_empty() || prefix.contains('*') {
            return Err(CacheError::invalid_prefix(prefix, "must be a literal, non-empty prefix"));
        }
        if keys::is_reserved(prefix) {
            return Err(CacheError::invalid_prefix(prefix, "reserved for another component"));
        }

        let pattern = keys::scan_pattern(prefix);
        let mut cursor = 0;
        let mut deleted = 0u64;

        loop {
            let page = self
                .store
                .scan(cursor, &pattern, self.config.scan_page_size)
                .await
                .map_err(|source| CacheError::PartialClear { deleted, source })?;

            if !page.keys.is_empty() {
                deleted += self
                    .store
                    .delete_many(&page.keys)
                    .await
                    .map_err(|source| CacheError::PartialClear { deleted, source })?;
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::info!(prefix = %prefix, deleted, "cache prefix cleared");
        Ok(deleted)
    }

    /// Background writes not yet finished.
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> CacheStats {
        let connected = self.store.ping().await.is_ok();
        let key_count = if connected {
            self.store.db_size().await.ok()
        } else {
            None
        };
        CacheStats {
            backend: self.store.backend().as_str(),
            connected,
            key_count,
            pending_writes: self.pending_writes(),
        }
    }

    /// Give in-flight writes up to `grace` to finish.
    ///
    /// This drains the shared task registry, so it also stops any other
    /// background work registered with it.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.tasks.drain(grace).await
    }
}

/// Metric label for a key: its prefix, or `other`.
fn operation_label(key: &str) -> &'static str {
    let prefix = key.split_once(':').map_or(key, |(prefix, _)| prefix);
    OperationKind::ALL
        .into_iter()
        .find(|kind| kind.cache_prefix() == prefix)
        .map_or("other", OperationKind::cache_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use temandifa_store::{MemoryStore, UnavailableStore};

    fn memory_cache() -> CacheAside {
        CacheAside::new(MemoryStore::new_shared(), BackgroundTasks::new(), CacheConfig::default())
    }

    #[test]
    fn test_operation_label() {
        assert_eq!(operation_label("ocr:abcd"), "ocr");
        assert_eq!(operation_label("vqa:abcd"), "vqa");
        assert_eq!(operation_label("custom:abcd"), "other");
        assert_eq!(operation_label("nocolon"), "other");
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = memory_cache();
        let key = cache.fingerprint("detect", &[b"image"]);

        assert_eq!(cache.get(&key).await, None);
        cache.set_async(key.clone(), b"result".to_vec(), Duration::from_secs(60));
        cache.drain(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key).await, Some(b"result".to_vec()));
        assert_eq!(cache.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_always_a_miss() {
        let cache = CacheAside::new(
            Arc::new(UnavailableStore),
            BackgroundTasks::new(),
            CacheConfig::default(),
        );
        cache.set_async("detect:k".into(), b"v".to_vec(), Duration::from_secs(60));
        let outcome = cache.drain(Duration::from_secs(1)).await;
        assert!(outcome.completed);
        assert_eq!(cache.get("detect:k").await, None);

        let stats = cache.stats().await;
        assert!(!stats.connected);
        assert_eq!(stats.backend, "unavailable");
        assert_eq!(stats.key_count, None);
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Detection {
            label: String,
            confidence: f32,
        }

        let cache = memory_cache();
        let value = vec![Detection {
            label: "car".into(),
            confidence: 0.9,
        }];
        cache
            .set_json_async("detect:json".into(), &value, Duration::from_secs(60))
            .unwrap();
        cache.drain(Duration::from_secs(1)).await;

        let loaded: Option<Vec<Detection>> = cache.get_json("detect:json").await;
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_miss() {
        let cache = memory_cache();
        cache.set_async("detect:bad".into(), b"not json".to_vec(), Duration::from_secs(60));
        cache.drain(Duration::from_secs(1)).await;
        let loaded: Option<serde_json::Value> = cache.get_json("detect:bad").await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_writes_after_drain_are_skipped() {
        let cache = memory_cache();
        cache.drain(Duration::from_millis(10)).await;
        cache.set_async("ocr:late".into(), b"v".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.pending_writes(), 0);
        assert_eq!(cache.get("ocr:late").await, None);
    }

    #[tokio::test]
    async fn test_clear_by_prefix_rejects_reserved_and_empty() {
        let cache = memory_cache();
        assert!(matches!(
            cache.clear_by_prefix("blacklist").await,
            Err(CacheError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            cache.clear_by_prefix("").await,
            Err(CacheError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            cache.clear_by_prefix("oc*").await,
            Err(CacheError::InvalidPrefix { .. })
        ));
    }

    #[tokio::test]
    async fn test_clear_by_prefix_on_unavailable_store() {
        let cache = CacheAside::new(
            Arc::new(UnavailableStore),
            BackgroundTasks::new(),
            CacheConfig::default(),
        );
        let err = cache.clear_by_prefix("ocr").await.unwrap_err();
        assert_eq!(err.deleted_so_far(), 0);
        assert!(matches!(err, CacheError::PartialClear { .. }));
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = memory_cache();
        cache.set_async("ocr:x".into(), b"v".to_vec(), Duration::from_secs(60));
        cache.drain(Duration::from_secs(1)).await;
        assert!(cache.delete("ocr:x").await.unwrap());
        assert!(!cache.delete("ocr:x").await.unwrap());
    }
}
