//! Redis-backed store on a deadpool connection pool.
//!
//! Multi-step operations that must be atomic run as `MULTI`/`EXEC`
//! pipelines, so two gateway instances probing the same key can never
//! interleave.

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{StoreError, StoreResult};
use crate::traits::{KeyValueStore, ScanPage, StoreBackend, WindowProbe};
use crate::ttl_millis;

/// Shared Redis `KeyValueStore`.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and verify one connection.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = config.pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        } else {
            let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
            redis_config.pool = Some(pool_config);
        }

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("failed to create pool: {e}")))?;

        let store = Self::from_pool(pool);
        store.ping().await?;
        Ok(store)
    }

    /// Underlying pool, for health reporting.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let ms = ttl_millis(ttl)?;
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let ms = ttl_millis(ttl)?;
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let ms = ttl_millis(ttl)?;
        let mut conn = self.conn().await?;
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ms)
            .query_async(&mut conn)
            .await?;
        Ok(updated)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: u64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let mut conn = self.conn().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor: next, keys })
    }

    async fn db_size(&self) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    async fn window_probe(&self, key: &str, probe: &WindowProbe) -> StoreResult<u64> {
        let ms = ttl_millis(probe.ttl)?;
        let mut conn = self.conn().await?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(probe.window_start)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(probe.score)
            .arg(&probe.member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ms)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}
