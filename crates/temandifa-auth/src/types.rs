//! Token lifecycle domain types.
//!
//! # Security
//!
//! - Refresh tokens are stored as SHA-256 hashes, never plaintext
//! - Session listings expose device metadata only

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Random bytes in a refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Client device details recorded with each refresh token for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl DeviceMeta {
    #[must_use]
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        Self {
            user_agent,
            ip_address,
        }
    }
}

/// Stored refresh token record.
///
/// The token itself is never stored. Lookups hash the presented value and
/// search by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Record identifier, safe to show to the owner.
    pub id: Uuid,

    /// SHA-256 hex of the token value.
    pub token_hash: String,

    pub user_id: String,

    #[serde(default)]
    pub device: DeviceMeta,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Set once the token has been used or revoked.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
}

impl RefreshToken {
    /// Returns `true` if this token is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if this token has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Returns `true` if this token can still be exchanged at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.is_expired_at(now) && !self.is_revoked()
    }

    /// SHA-256 hex of a token value.
    #[must_use]
    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// A new random token: 64 bytes from the OS RNG, URL-safe base64 without
    /// padding.
    #[must_use]
    pub fn generate_token() -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// One active session as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub device: DeviceMeta,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<&RefreshToken> for SessionInfo {
    fn from(token: &RefreshToken) -> Self {
        Self {
            id: token.id,
            device: token.device.clone(),
            created_at: token.created_at,
            expires_at: token.expires_at,
        }
    }
}

/// Tokens handed to a client after login or refresh.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    /// Always `"Bearer"`.
    pub token_type: &'static str,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_hash_token() {
        let hash = RefreshToken::hash_token("test-token-value");

        // SHA-256 produces 64 hex characters
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, RefreshToken::hash_token("test-token-value"));
        assert_ne!(hash, RefreshToken::hash_token("different-token"));
    }

    #[test]
    fn test_generate_token() {
        let token = RefreshToken::generate_token();

        // 64 bytes base64url without padding = 86 characters
        assert_eq!(token.len(), 86);
        assert!(!token.contains('='));
        assert_ne!(token, RefreshToken::generate_token());
    }

    #[test]
    fn test_validity() {
        let now = OffsetDateTime::now_utc();
        let mut token = RefreshToken {
            id: Uuid::new_v4(),
            token_hash: RefreshToken::hash_token("t"),
            user_id: "u-1".into(),
            device: DeviceMeta::default(),
            created_at: now,
            expires_at: now + Duration::days(7),
            revoked_at: None,
        };
        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::days(7)));

        token.revoked_at = Some(now);
        assert!(!token.is_valid_at(now));
    }

    #[test]
    fn test_record_round_trips_as_json() {
        let now = time::macros::datetime!(2025-03-01 12:00 UTC);
        let token = RefreshToken {
            id: Uuid::nil(),
            token_hash: "ab".into(),
            user_id: "42".into(),
            device: DeviceMeta::new(Some("Android".into()), Some("10.0.0.2".into())),
            created_at: now,
            expires_at: now + Duration::days(7),
            revoked_at: None,
        };
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("2025-03-08T12:00:00Z"));
        assert!(!json.contains("revoked_at"));
        assert_eq!(serde_json::from_str::<RefreshToken>(&json).unwrap(), token);
    }

    #[test]
    fn test_token_pair_debug_hides_tokens() {
        let now = OffsetDateTime::now_utc();
        let pair = TokenPair {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            expires_at: now,
            refresh_expires_at: now,
            token_type: "Bearer",
        };
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret"));
    }
}
