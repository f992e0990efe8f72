//! Access token blacklist.
//!
//! Logout invalidates a still-valid access token by storing a marker under
//! `blacklist:<sha256-hex>` that expires together with the token. Raw tokens
//! are never stored or logged.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use temandifa_store::{KeyValueStore, StoreResult, keys};

/// Blacklist of revoked access tokens.
#[derive(Clone)]
pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
    scan_page_size: usize,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            scan_page_size: 100,
        }
    }

    #[must_use]
    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size.max(1);
        self
    }

    /// Store key for a token.
    pub fn key_for(token: &str) -> String {
        keys::join(keys::BLACKLIST, &hex::encode(Sha256::digest(token.as_bytes())))
    }

    /// Blacklist `token` for `remaining`, its remaining lifetime. A token with
    /// no lifetime left is already unusable and is not stored.
    pub async fn add(&self, token: &str, remaining: Duration) -> StoreResult<()> {
        let key = Self::key_for(token);
        if remaining < Duration::from_millis(1) {
            tracing::debug!(key = %short(&key), "token already expired, not blacklisted");
            return Ok(());
        }
        self.store.set_ex(&key, b"1", remaining).await.inspect_err(|e| {
            tracing::error!(key = %short(&key), error = %e, "Failed to blacklist token");
        })?;
        tracing::debug!(key = %short(&key), ttl_secs = remaining.as_secs(), "Token blacklisted");
        Ok(())
    }

    /// Returns `true` if `token` is blacklisted. Store errors are returned so
    /// the caller can apply its revocation policy.
    pub async fn is_blacklisted(&self, token: &str) -> StoreResult<bool> {
        self.store.exists(&Self::key_for(token)).await
    }

    /// Lift a blacklist entry. Returns `true` if one existed.
    pub async fn remove(&self, token: &str) -> StoreResult<bool> {
        self.store.delete(&Self::key_for(token)).await
    }

    /// Number of blacklisted tokens, counted with a paged scan.
    pub async fn count(&self) -> StoreResult<u64> {
        let pattern = keys::scan_pattern(keys::BLACKLIST);
        let mut cursor = 0;
        let mut total = 0;
        loop {
            let page = self.store.scan(cursor, &pattern, self.scan_page_size).await?;
            total += page.keys.len() as u64;
            cursor = page.cursor;
            if cursor == 0 {
                return Ok(total);
            }
        }
    }
}

impl std::fmt::Debug for TokenBlacklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBlacklist")
            .field("backend", &self.store.backend())
            .finish_non_exhaustive()
    }
}

/// Key prefix safe for logs.
fn short(key: &str) -> &str {
    key.get(..26).unwrap_or(key)
}
