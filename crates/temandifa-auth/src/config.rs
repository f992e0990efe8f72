//! Token lifecycle configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! signing_secret = "change-me-to-at-least-32-bytes-of-entropy"
//! issuer = "temandifa"
//! access_token_lifetime = "15m"
//! refresh_token_lifetime = "7d"
//! cleanup_grace = "7d"
//! cleanup_interval = "24h"
//! revocation_check = "fail_closed"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::jwt::SigningAlgorithm;

/// Minimum length of the HS256 shared secret, in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// Longest accepted access token lifetime.
pub const MAX_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted refresh token lifetime, and longest record retention.
pub const MAX_REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// What access-token validation does when the blacklist cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationCheckPolicy {
    /// Reject the request. A logged-out token is never accepted.
    #[default]
    FailClosed,
    /// Accept the token and log the skipped check.
    FailOpen,
}

/// Token service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access token signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// HS256 shared secret.
    pub signing_secret: String,

    /// RS256 private key (PKCS#8 PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,

    /// RS256 public key (SPKI PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,

    /// `iss` claim written into and required from access tokens.
    pub issuer: String,

    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// How long expired refresh token records are kept before the sweep
    /// deletes them.
    #[serde(with = "humantime_serde")]
    pub cleanup_grace: Duration,

    /// Interval between cleanup sweeps.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    pub revocation_check: RevocationCheckPolicy,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::HS256,
            signing_secret: String::new(),
            private_key_path: None,
            public_key_path: None,
            issuer: "temandifa".to_string(),
            access_token_lifetime: Duration::from_secs(15 * 60),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_grace: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            revocation_check: RevocationCheckPolicy::default(),
        }
    }
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.algorithm {
            SigningAlgorithm::HS256 => {
                if self.signing_secret.len() < MIN_SECRET_BYTES {
                    return Err(format!(
                        "auth.signing_secret must be at least {MIN_SECRET_BYTES} bytes"
                    ));
                }
            }
            SigningAlgorithm::RS256 => {
                if self.private_key_path.is_none() || self.public_key_path.is_none() {
                    return Err(
                        "auth.private_key_path and auth.public_key_path are required for RS256"
                            .to_string(),
                    );
                }
            }
        }
        if self.issuer.trim().is_empty() {
            return Err("auth.issuer must not be empty".to_string());
        }
        if self.access_token_lifetime < Duration::from_secs(1) {
            return Err("auth.access_token_lifetime must be at least 1s".to_string());
        }
        if self.access_token_lifetime > MAX_ACCESS_TOKEN_LIFETIME {
            return Err("auth.access_token_lifetime must be at most 24h".to_string());
        }
        if self.refresh_token_lifetime > MAX_REFRESH_TOKEN_LIFETIME {
            return Err("auth.refresh_token_lifetime must be at most 365d".to_string());
        }
        if self.cleanup_grace > MAX_REFRESH_TOKEN_LIFETIME {
            return Err("auth.cleanup_grace must be at most 365d".to_string());
        }
        if self.refresh_token_lifetime <= self.access_token_lifetime {
            return Err(
                "auth.refresh_token_lifetime must be longer than auth.access_token_lifetime"
                    .to_string(),
            );
        }
        if self.cleanup_interval.is_zero() || self.cleanup_interval > MAX_REFRESH_TOKEN_LIFETIME {
            return Err("auth.cleanup_interval must be > 0 and at most 365d".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TokenConfig {
        TokenConfig {
            signing_secret: "s".repeat(32),
            ..TokenConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = TokenConfig::default();
        assert_eq!(config.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(config.refresh_token_lifetime, Duration::from_secs(604_800));
        assert_eq!(config.revocation_check, RevocationCheckPolicy::FailClosed);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = TokenConfig {
            signing_secret: "s".repeat(31),
            ..TokenConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("32 bytes"));
    }

    #[test]
    fn test_rs256_needs_key_paths() {
        let config = TokenConfig {
            algorithm: SigningAlgorithm::RS256,
            ..TokenConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lifetimes_ordered() {
        let config = TokenConfig {
            refresh_token_lifetime: Duration::from_secs(60),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lifetimes_capped() {
        let config = TokenConfig {
            access_token_lifetime: Duration::from_secs(2 * 24 * 60 * 60),
            refresh_token_lifetime: MAX_REFRESH_TOKEN_LIFETIME,
            ..valid()
        };
        assert!(config.validate().unwrap_err().contains("access_token_lifetime"));

        let config = TokenConfig {
            refresh_token_lifetime: MAX_REFRESH_TOKEN_LIFETIME + Duration::from_secs(1),
            ..valid()
        };
        assert!(config.validate().unwrap_err().contains("refresh_token_lifetime"));

        let config = TokenConfig {
            cleanup_grace: Duration::from_secs(20_000 * 365 * 24 * 60 * 60),
            ..valid()
        };
        assert!(config.validate().unwrap_err().contains("cleanup_grace"));
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{
            "signing_secret": "0123456789abcdef0123456789abcdef",
            "access_token_lifetime": "5m",
            "revocation_check": "fail_open"
        }"#;
        let config: TokenConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.access_token_lifetime, Duration::from_secs(300));
        assert_eq!(config.revocation_check, RevocationCheckPolicy::FailOpen);
        assert_eq!(config.issuer, "temandifa");
        assert!(config.validate().is_ok());
    }
}
