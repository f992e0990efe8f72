//! Refresh token storage.
//!
//! [`StoreRefreshTokenStorage`] keeps refresh tokens in the shared key-value
//! store:
//!
//! - `refresh_token:<hash>` holds the JSON record, expiring after the token's
//!   lifetime plus the cleanup grace period
//! - `refresh_revoked:<hash>` is the revocation marker, created with
//!   set-if-absent so exactly one caller wins a revocation
//! - `refresh_user:<user-id>` is the set of a user's token hashes

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use temandifa_store::{KeyValueStore, keys};

use crate::AuthResult;
use crate::types::RefreshToken;

/// Storage trait for refresh tokens.
///
/// Implementations must make [`revoke`](Self::revoke) atomic: when several
/// callers revoke the same token concurrently, exactly one of them observes
/// `true`.
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    /// Stores a new refresh token.
    async fn create(&self, token: &RefreshToken) -> AuthResult<()>;

    /// Finds a refresh token by its hash, with `revoked_at` filled in if the
    /// token has been revoked.
    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>>;

    /// Revokes a refresh token. Returns `true` only for the call that
    /// performed the revocation; `false` if it was already revoked or does
    /// not exist.
    async fn revoke(&self, token_hash: &str) -> AuthResult<bool>;

    /// Revokes all refresh tokens for a user. Returns how many were revoked
    /// by this call.
    async fn revoke_by_user(&self, user_id: &str) -> AuthResult<u64>;

    /// Lists a user's tokens that are neither expired nor revoked.
    async fn list_by_user(&self, user_id: &str) -> AuthResult<Vec<RefreshToken>>;

    /// Hard-deletes records whose expiry is before `cutoff`. Returns the
    /// number deleted.
    async fn cleanup_expired(&self, cutoff: OffsetDateTime) -> AuthResult<u64>;
}

/// Refresh token storage on a [`KeyValueStore`].
#[derive(Clone)]
pub struct StoreRefreshTokenStorage {
    store: Arc<dyn KeyValueStore>,
    /// Extra time records outlive their expiry, so the sweep and audits can
    /// still see them.
    retention: Duration,
    scan_page_size: usize,
}

impl StoreRefreshTokenStorage {
    pub fn new(store: Arc<dyn KeyValueStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            scan_page_size: 100,
        }
    }

    #[must_use]
    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size.max(1);
        self
    }

    fn record_key(token_hash: &str) -> String {
        keys::join(keys::REFRESH_TOKEN, token_hash)
    }

    fn revoked_key(token_hash: &str) -> String {
        keys::join(keys::REFRESH_REVOKED, token_hash)
    }

    fn user_key(user_id: &str) -> String {
        keys::join(keys::REFRESH_USER_INDEX, user_id)
    }

    /// Store expiry for a token's keys: remaining lifetime plus retention.
    fn store_ttl(&self, expires_at: OffsetDateTime, now: OffsetDateTime) -> Duration {
        let remaining = Duration::try_from(expires_at - now).unwrap_or(Duration::ZERO);
        remaining.saturating_add(self.retention).max(Duration::from_secs(1))
    }

    async fn load(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        match self.store.get(&Self::record_key(token_hash)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a record together with its marker and index entry.
    async fn remove(&self, token: &RefreshToken) -> AuthResult<()> {
        self.store
            .delete_many(&[
                Self::record_key(&token.token_hash),
                Self::revoked_key(&token.token_hash),
            ])
            .await?;
        self.store
            .set_remove(&Self::user_key(&token.user_id), &token.token_hash)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStorage for StoreRefreshTokenStorage {
    async fn create(&self, token: &RefreshToken) -> AuthResult<()> {
        let ttl = self.store_ttl(token.expires_at, OffsetDateTime::now_utc());
        let record = serde_json::to_vec(token)?;
        self.store
            .set_ex(&Self::record_key(&token.token_hash), &record, ttl)
            .await?;

        // Tokens share one lifetime, so the newest token's expiry covers the
        // whole index.
        let index = Self::user_key(&token.user_id);
        self.store.set_add(&index, &token.token_hash).await?;
        self.store.expire(&index, ttl).await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        let Some(mut token) = self.load(token_hash).await? else {
            return Ok(None);
        };
        if let Some(marker) = self.store.get(&Self::revoked_key(token_hash)).await? {
            let revoked_at = std::str::from_utf8(&marker)
                .ok()
                .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
                .unwrap_or(token.created_at);
            token.revoked_at = Some(revoked_at);
        }
        Ok(Some(token))
    }

    async fn revoke(&self, token_hash: &str) -> AuthResult<bool> {
        let Some(token) = self.load(token_hash).await? else {
            return Ok(false);
        };
        let now = OffsetDateTime::now_utc();
        let stamp = now
            .format(&Rfc3339)
            .map_err(|e| crate::AuthError::internal(e.to_string()))?;
        let won = self
            .store
            .set_nx_ex(
                &Self::revoked_key(token_hash),
                stamp.as_bytes(),
                self.store_ttl(token.expires_at, now),
            )
            .await?;
        Ok(won)
    }

    async fn revoke_by_user(&self, user_id: &str) -> AuthResult<u64> {
        let index = Self::user_key(user_id);
        let mut revoked = 0;
        for token_hash in self.store.set_members(&index).await? {
            if self.load(&token_hash).await?.is_none() {
                self.store.set_remove(&index, &token_hash).await?;
                continue;
            }
            if self.revoke(&token_hash).await? {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_by_user(&self, user_id: &str) -> AuthResult<Vec<RefreshToken>> {
        let index = Self::user_key(user_id);
        let now = OffsetDateTime::now_utc();
        let mut active = Vec::new();
        for token_hash in self.store.set_members(&index).await? {
            match self.find_by_hash(&token_hash).await? {
                Some(token) if token.is_valid_at(now) => active.push(token),
                Some(_) => {}
                None => {
                    self.store.set_remove(&index, &token_hash).await?;
                }
            }
        }
        active.sort_by_key(|t| t.created_at);
        Ok(active)
    }

    async fn cleanup_expired(&self, cutoff: OffsetDateTime) -> AuthResult<u64> {
        let pattern = keys::scan_pattern(keys::REFRESH_TOKEN);
        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let page = self.store.scan(cursor, &pattern, self.scan_page_size).await?;
            for key in &page.keys {
                let Some(bytes) = self.store.get(key).await? else {
                    continue;
                };
                match serde_json::from_slice::<RefreshToken>(&bytes) {
                    Ok(token) if token.expires_at < cutoff => {
                        self.remove(&token).await?;
                        deleted += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Deleting unreadable refresh token record");
                        self.store.delete(key).await?;
                        deleted += 1;
                    }
                }
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for StoreRefreshTokenStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRefreshTokenStorage")
            .field("backend", &self.store.backend())
            .field("retention", &self.retention)
            .field("scan_page_size", &self.scan_page_size)
            .finish()
    }
}
