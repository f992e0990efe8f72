//! Token service: issuing, rotating, validating and revoking tokens.
//!
//! # Usage
//!
//! ```ignore
//! use temandifa_auth::{TokenService, TokenConfig};
//!
//! let service = TokenService::from_store(config, store)?;
//! let pair = service.issue_pair("42", &device).await?;
//! let claims = service.validate_access(&pair.access_token).await?;
//! let rotated = service.refresh(&pair.refresh_token, &device).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use temandifa_core::{BackgroundTasks, metrics, saturating_add, saturating_sub};
use temandifa_store::KeyValueStore;

use crate::blacklist::TokenBlacklist;
use crate::config::{RevocationCheckPolicy, TokenConfig};
use crate::error::{AuthError, AuthResult};
use crate::jwt::{AccessTokenClaims, JwtError, JwtService, SigningKeyPair, TOKEN_TYPE_ACCESS};
use crate::storage::{RefreshTokenStorage, StoreRefreshTokenStorage};
use crate::types::{DeviceMeta, RefreshToken, SessionInfo, TokenPair};

/// Token lifecycle manager.
pub struct TokenService {
    /// JWT service for encoding/decoding access tokens.
    jwt: JwtService,

    /// Refresh token storage.
    refresh_tokens: Arc<dyn RefreshTokenStorage>,

    /// Access token blacklist.
    blacklist: TokenBlacklist,

    config: TokenConfig,
}

impl TokenService {
    /// Creates a token service.
    ///
    /// # Errors
    /// Returns a configuration error if the signing key cannot be built.
    pub fn new(
        config: TokenConfig,
        refresh_tokens: Arc<dyn RefreshTokenStorage>,
        blacklist: TokenBlacklist,
    ) -> AuthResult<Self> {
        let key = SigningKeyPair::from_config(&config)
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        Ok(Self {
            jwt: JwtService::new(key, config.issuer.clone()),
            refresh_tokens,
            blacklist,
            config,
        })
    }

    /// Creates a token service keeping all token state in `store`.
    ///
    /// # Errors
    /// Returns a configuration error if the signing key cannot be built.
    pub fn from_store(config: TokenConfig, store: Arc<dyn KeyValueStore>) -> AuthResult<Self> {
        let refresh_tokens = StoreRefreshTokenStorage::new(store.clone(), config.cleanup_grace);
        Self::new(config, Arc::new(refresh_tokens), TokenBlacklist::new(store))
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    // =========================================================================
    // Issuance and rotation
    // =========================================================================

    /// Issues a new access/refresh token pair for `user_id`.
    ///
    /// # Errors
    /// Returns an error if signing fails or the refresh token cannot be stored.
    pub async fn issue_pair(&self, user_id: &str, device: &DeviceMeta) -> AuthResult<TokenPair> {
        let now = OffsetDateTime::now_utc();
        let access_expires_at = saturating_add(now, self.config.access_token_lifetime);
        let refresh_expires_at = saturating_add(now, self.config.refresh_token_lifetime);

        let claims = AccessTokenClaims::new(&self.config.issuer, user_id, now, access_expires_at);
        let access_token = self
            .jwt
            .encode(&claims)
            .map_err(|e| AuthError::internal(format!("Failed to encode access token: {e}")))?;

        let refresh_value = RefreshToken::generate_token();
        let record = RefreshToken {
            id: Uuid::new_v4(),
            token_hash: RefreshToken::hash_token(&refresh_value),
            user_id: user_id.to_string(),
            device: device.clone(),
            created_at: now,
            expires_at: refresh_expires_at,
            revoked_at: None,
        };
        self.refresh_tokens.create(&record).await?;

        metrics::record_tokens_issued();
        tracing::debug!(
            user_id = %user_id,
            session_id = %record.id,
            access_expires_at = %access_expires_at,
            "Token pair issued"
        );

        Ok(TokenPair {
            access_token,
            refresh_token: refresh_value,
            expires_at: access_expires_at,
            refresh_expires_at,
            token_type: "Bearer",
        })
    }

    /// Exchanges a refresh token for a new pair bound to the same user.
    ///
    /// Refresh tokens are single-use: the presented token is revoked before
    /// the new pair is issued. When the same token is presented concurrently,
    /// exactly one caller succeeds and the others get
    /// [`AuthError::TokenRevoked`].
    ///
    /// # Errors
    /// - `RefreshTokenNotFound` if no record matches
    /// - `TokenExpired` if the token is past expiry
    /// - `TokenRevoked` if it was already used or revoked
    pub async fn refresh(&self, refresh_token: &str, device: &DeviceMeta) -> AuthResult<TokenPair> {
        let token_hash = RefreshToken::hash_token(refresh_token);
        let stored = self
            .refresh_tokens
            .find_by_hash(&token_hash)
            .await?
            .ok_or(AuthError::RefreshTokenNotFound)?;

        if stored.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(AuthError::TokenExpired);
        }
        if stored.is_revoked() || !self.refresh_tokens.revoke(&token_hash).await? {
            tracing::debug!(session_id = %stored.id, "Refresh token reuse rejected");
            return Err(AuthError::TokenRevoked);
        }

        self.issue_pair(&stored.user_id, device).await
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validates an access token and returns its claims. `claims.sub` is the
    /// user id.
    ///
    /// Checks signature, issuer, expiry, the `type` claim and the blacklist,
    /// in that order.
    ///
    /// # Errors
    /// Returns the distinguishing [`AuthError`] for the first failed check.
    pub async fn validate_access(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let result = self.check_access(token).await;
        if let Err(e) = &result {
            metrics::record_token_validation_failure(e.metric_reason());
        }
        result
    }

    async fn check_access(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let claims = self
            .jwt
            .decode::<AccessTokenClaims>(token)
            .map_err(map_jwt_error)?
            .claims;

        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(AuthError::type_mismatch(TOKEN_TYPE_ACCESS, claims.token_type));
        }

        match self.blacklist.is_blacklisted(token).await {
            Ok(false) => Ok(claims),
            Ok(true) => Err(AuthError::TokenBlacklisted),
            Err(e) => match self.config.revocation_check {
                RevocationCheckPolicy::FailClosed => {
                    tracing::warn!(error = %e, "Blacklist unavailable, rejecting token");
                    Err(e.into())
                }
                RevocationCheckPolicy::FailOpen => {
                    tracing::warn!(error = %e, "Blacklist unavailable, skipping revocation check");
                    Ok(claims)
                }
            },
        }
    }

    // =========================================================================
    // Revocation
    // =========================================================================

    /// Revokes one refresh token. Returns `true` if this call revoked it.
    pub async fn revoke(&self, refresh_token: &str) -> AuthResult<bool> {
        self.refresh_tokens
            .revoke(&RefreshToken::hash_token(refresh_token))
            .await
    }

    /// Revokes every refresh token of `user_id`. Returns how many were
    /// revoked.
    pub async fn revoke_all(&self, user_id: &str) -> AuthResult<u64> {
        let count = self.refresh_tokens.revoke_by_user(user_id).await?;
        tracing::info!(user_id = %user_id, count, "Revoked all user tokens");
        Ok(count)
    }

    /// Blacklists an access token for `remaining`, its remaining lifetime.
    pub async fn blacklist_access_token(&self, token: &str, remaining: Duration) -> AuthResult<()> {
        self.blacklist.add(token, remaining).await?;
        Ok(())
    }

    /// Ends one session: revokes the refresh token and blacklists the access
    /// token until it would have expired anyway.
    ///
    /// An access token that does not verify is not blacklisted; it is
    /// already unusable.
    pub async fn logout(&self, refresh_token: &str, access_token: &str) -> AuthResult<()> {
        self.revoke(refresh_token).await?;
        self.blacklist_until_expiry(access_token).await
    }

    /// Ends every session of `user_id`, and blacklists the access token used
    /// for the request if one is given.
    pub async fn logout_all(&self, user_id: &str, access_token: Option<&str>) -> AuthResult<u64> {
        let count = self.revoke_all(user_id).await?;
        if let Some(token) = access_token {
            self.blacklist_until_expiry(token).await?;
        }
        Ok(count)
    }

    async fn blacklist_until_expiry(&self, access_token: &str) -> AuthResult<()> {
        let Ok(data) = self.jwt.decode_allow_expired::<AccessTokenClaims>(access_token) else {
            return Ok(());
        };
        let remaining = data.claims.expires_at() - OffsetDateTime::now_utc();
        if let Ok(remaining) = Duration::try_from(remaining) {
            self.blacklist_access_token(access_token, remaining).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Sessions and maintenance
    // =========================================================================

    /// Active sessions of `user_id`, oldest first.
    pub async fn list_sessions(&self, user_id: &str) -> AuthResult<Vec<SessionInfo>> {
        let tokens = self.refresh_tokens.list_by_user(user_id).await?;
        Ok(tokens.iter().map(SessionInfo::from).collect())
    }

    /// Deletes refresh token records that expired more than `cleanup_grace`
    /// ago. Returns the number deleted.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        let cutoff = saturating_sub(OffsetDateTime::now_utc(), self.config.cleanup_grace);
        let count = self.refresh_tokens.cleanup_expired(cutoff).await?;
        metrics::record_refresh_tokens_cleaned(count);
        if count > 0 {
            tracing::info!(tokens_removed = count, "Token cleanup completed");
        }
        Ok(count)
    }

    /// Runs [`cleanup_expired`](Self::cleanup_expired) now and then every
    /// `cleanup_interval` until shutdown.
    pub fn start_cleanup_task(self: &Arc<Self>, tasks: &BackgroundTasks) {
        let service = Arc::clone(self);
        let shutdown = tasks.cancellation_token();
        let interval = self.config.cleanup_interval;
        tracing::info!(interval_secs = interval.as_secs(), "Token cleanup job started");

        tasks.spawn("token-cleanup", async move {
            // First tick completes immediately.
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Token cleanup job stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.cleanup_expired().await {
                            tracing::error!(error = %e, "Token cleanup failed");
                        }
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.jwt.algorithm())
            .field("issuer", &self.jwt.issuer())
            .field("blacklist", &self.blacklist)
            .finish_non_exhaustive()
    }
}

fn map_jwt_error(err: JwtError) -> AuthError {
    match err {
        JwtError::Expired => AuthError::TokenExpired,
        JwtError::InvalidSignature => AuthError::malformed("invalid signature"),
        JwtError::InvalidClaims { message } | JwtError::DecodingError { message } => {
            AuthError::malformed(message)
        }
        other => AuthError::internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use temandifa_store::{MemoryStore, UnavailableStore};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config() -> TokenConfig {
        TokenConfig {
            signing_secret: SECRET.to_string(),
            ..TokenConfig::default()
        }
    }

    fn service() -> TokenService {
        TokenService::from_store(config(), MemoryStore::new_shared()).unwrap()
    }

    fn device() -> DeviceMeta {
        DeviceMeta::new(Some("okhttp/4.12".into()), Some("10.1.2.3".into()))
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let service = service();
        let pair = service.issue_pair("42", &device()).await.unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_ne!(pair.access_token, pair.refresh_token);

        let claims = service.validate_access(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.iss, "temandifa");
    }

    #[tokio::test]
    async fn test_refresh_rotates() {
        let service = service();
        let first = service.issue_pair("42", &device()).await.unwrap();
        let second = service.refresh(&first.refresh_token, &device()).await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);

        let claims = service.validate_access(&second.access_token).await.unwrap();
        assert_eq!(claims.sub, "42");

        let reuse = service.refresh(&first.refresh_token, &device()).await.unwrap_err();
        assert!(matches!(reuse, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_refresh_unknown_token() {
        let err = service().refresh("nope", &device()).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshTokenNotFound));
    }

    #[derive(Serialize)]
    struct TypedClaims<'a> {
        iss: &'a str,
        sub: &'a str,
        exp: i64,
        iat: i64,
        jti: &'a str,
        #[serde(rename = "type")]
        token_type: &'a str,
    }

    #[tokio::test]
    async fn test_refresh_typed_jwt_rejected_as_access() {
        let service = service();
        let now = OffsetDateTime::now_utc();
        let jwt = JwtService::new(SigningKeyPair::from_secret(SECRET.as_bytes()).unwrap(), "temandifa");
        let token = jwt
            .encode(&TypedClaims {
                iss: "temandifa",
                sub: "42",
                exp: (now + time::Duration::minutes(5)).unix_timestamp(),
                iat: now.unix_timestamp(),
                jti: "j-1",
                token_type: "refresh",
            })
            .unwrap();

        let err = service.validate_access(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_type_claim_is_malformed() {
        #[derive(Serialize)]
        struct Untyped<'a> {
            iss: &'a str,
            sub: &'a str,
            exp: i64,
        }
        let service = service();
        let jwt = JwtService::new(SigningKeyPair::from_secret(SECRET.as_bytes()).unwrap(), "temandifa");
        let exp = (OffsetDateTime::now_utc() + time::Duration::minutes(5)).unix_timestamp();
        let token = jwt.encode(&Untyped { iss: "temandifa", sub: "42", exp }).unwrap();

        let err = service.validate_access(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenMalformed { .. }));
    }

    #[tokio::test]
    async fn test_expired_access_token() {
        let service = TokenService::from_store(
            TokenConfig {
                access_token_lifetime: Duration::from_secs(1),
                ..config()
            },
            MemoryStore::new_shared(),
        )
        .unwrap();
        let pair = service.issue_pair("42", &device()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let err = service.validate_access(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_logout_blacklists_access_token() {
        let service = service();
        let pair = service.issue_pair("42", &device()).await.unwrap();

        service.logout(&pair.refresh_token, &pair.access_token).await.unwrap();

        let err = service.validate_access(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenBlacklisted));
        let err = service.refresh(&pair.refresh_token, &device()).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_logout_all_and_sessions() {
        let service = service();
        let a = service.issue_pair("42", &device()).await.unwrap();
        service.issue_pair("42", &DeviceMeta::default()).await.unwrap();
        service.issue_pair("7", &device()).await.unwrap();

        let sessions = service.list_sessions("42").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().any(|s| s.device == device()));

        assert_eq!(service.logout_all("42", Some(&a.access_token)).await.unwrap(), 2);
        assert!(service.list_sessions("42").await.unwrap().is_empty());
        assert_eq!(service.list_sessions("7").await.unwrap().len(), 1);
        assert!(matches!(
            service.validate_access(&a.access_token).await.unwrap_err(),
            AuthError::TokenBlacklisted
        ));
    }

    #[tokio::test]
    async fn test_revocation_policy_on_store_outage() {
        let store: Arc<dyn KeyValueStore> = Arc::new(UnavailableStore);
        let issuer = service();
        let pair = issuer.issue_pair("42", &device()).await.unwrap();

        let strict = TokenService::from_store(config(), store.clone()).unwrap();
        let err = strict.validate_access(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));

        let lenient = TokenService::from_store(
            TokenConfig {
                revocation_check: RevocationCheckPolicy::FailOpen,
                ..config()
            },
            store,
        )
        .unwrap();
        assert_eq!(lenient.validate_access(&pair.access_token).await.unwrap().sub, "42");
    }

    #[tokio::test]
    async fn test_out_of_range_lifetimes_saturate() {
        let far = Duration::from_secs(20_000 * 365 * 24 * 60 * 60);
        let service = TokenService::from_store(
            TokenConfig {
                refresh_token_lifetime: far,
                cleanup_grace: far,
                ..config()
            },
            MemoryStore::new_shared(),
        )
        .unwrap();

        let pair = service.issue_pair("42", &device()).await.unwrap();
        assert_eq!(pair.refresh_expires_at.year(), 9999);
        assert_eq!(service.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_secret_is_configuration_error() {
        let err = TokenService::from_store(TokenConfig::default(), MemoryStore::new_shared())
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_on_shutdown() {
        let service = Arc::new(service());
        let tasks = BackgroundTasks::new();
        service.start_cleanup_task(&tasks);
        tokio::task::yield_now().await;
        assert_eq!(tasks.in_flight(), 1);

        let outcome = tasks.drain(Duration::from_secs(5)).await;
        assert!(outcome.completed);
    }
}
