//! Store used when no backend is configured.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::traits::{KeyValueStore, ScanPage, StoreBackend, WindowProbe};

/// Every operation fails with [`StoreError::Disabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

#[async_trait]
impl KeyValueStore for UnavailableStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Unavailable
    }

    async fn ping(&self) -> StoreResult<()> {
        Err(StoreError::Disabled)
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(StoreError::Disabled)
    }

    async fn set_ex(&self, _key: &str, _value: &[u8], _ttl: Duration) -> StoreResult<()> {
        Err(StoreError::Disabled)
    }

    async fn set_nx_ex(&self, _key: &str, _value: &[u8], _ttl: Duration) -> StoreResult<bool> {
        Err(StoreError::Disabled)
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        Err(StoreError::Disabled)
    }

    async fn delete_many(&self, _keys: &[String]) -> StoreResult<u64> {
        Err(StoreError::Disabled)
    }

    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        Err(StoreError::Disabled)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<bool> {
        Err(StoreError::Disabled)
    }

    async fn set_add(&self, _key: &str, _member: &str) -> StoreResult<bool> {
        Err(StoreError::Disabled)
    }

    async fn set_remove(&self, _key: &str, _member: &str) -> StoreResult<bool> {
        Err(StoreError::Disabled)
    }

    async fn set_members(&self, _key: &str) -> StoreResult<Vec<String>> {
        Err(StoreError::Disabled)
    }

    async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> StoreResult<ScanPage> {
        Err(StoreError::Disabled)
    }

    async fn db_size(&self) -> StoreResult<u64> {
        Err(StoreError::Disabled)
    }

    async fn window_probe(&self, _key: &str, _probe: &WindowProbe) -> StoreResult<u64> {
        Err(StoreError::Disabled)
    }
}
