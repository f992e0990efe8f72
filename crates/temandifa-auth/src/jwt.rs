//! JWT signing and verification for access tokens.
//!
//! ## Supported Algorithms
//!
//! - **HS256**: HMAC with SHA-256 over a shared secret of at least 32 bytes
//! - **RS256**: RSA with SHA-256, for deployments that hand the public key to
//!   other verifiers
//!
//! ## Example
//!
//! ```ignore
//! use temandifa_auth::jwt::{JwtService, SigningKeyPair};
//!
//! let key = SigningKeyPair::from_secret(secret.as_bytes())?;
//! let jwt = JwtService::new(key, "temandifa");
//!
//! let token = jwt.encode(&claims)?;
//! let data = jwt.decode::<AccessTokenClaims>(&token)?;
//! ```

use std::fmt;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::{MIN_SECRET_BYTES, TokenConfig};

/// `type` claim value carried by access tokens.
pub const TOKEN_TYPE_ACCESS: &str = "access";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                Self::invalid_key(err.to_string())
            }
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256.
    #[default]
    HS256,
    /// RSA with SHA-256.
    RS256,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user id).
    pub sub: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// JWT ID.
    pub jti: String,

    /// Token type. Only `"access"` is accepted by validation.
    #[serde(rename = "type")]
    pub token_type: String,
}

impl AccessTokenClaims {
    /// Claims for a fresh access token.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            exp: expires_at.unix_timestamp(),
            iat: issued_at.unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
        }
    }

    /// Expiry as a timestamp. Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key pair for JWT operations.
pub struct SigningKeyPair {
    /// Key ID written into the header. HS256 keys carry none.
    pub kid: Option<String>,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Encoding key (private key or secret) for signing.
    encoding_key: EncodingKey,

    /// Decoding key (public key or secret) for verification.
    decoding_key: DecodingKey,
}

impl SigningKeyPair {
    /// HS256 key from a shared secret.
    ///
    /// # Errors
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn from_secret(secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(JwtError::invalid_key(format!(
                "HS256 secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self {
            kid: None,
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    /// Loads an RS256 key pair from PEM strings.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: Some(kid.into()),
            algorithm: SigningAlgorithm::RS256,
            encoding_key,
            decoding_key,
        })
    }

    /// Key described by the token configuration. RS256 keys are read from
    /// the configured PEM files.
    ///
    /// # Errors
    /// Returns an error if the secret is too short or a key file cannot be
    /// read or parsed.
    pub fn from_config(config: &TokenConfig) -> Result<Self, JwtError> {
        match config.algorithm {
            SigningAlgorithm::HS256 => Self::from_secret(config.signing_secret.as_bytes()),
            SigningAlgorithm::RS256 => {
                let (Some(private_path), Some(public_path)) =
                    (&config.private_key_path, &config.public_key_path)
                else {
                    return Err(JwtError::invalid_key("RS256 requires private and public key paths"));
                };
                let read = |path: &std::path::Path| {
                    std::fs::read_to_string(path).map_err(|e| {
                        JwtError::invalid_key(format!("cannot read {}: {e}", path.display()))
                    })
                };
                let private_pem = read(private_path)?;
                let public_pem = read(public_path)?;
                Self::from_pem("primary", &private_pem, &public_pem)
            }
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Service for encoding and decoding JWT tokens.
///
/// This service is thread-safe (`Send + Sync`) and can be shared across
/// async tasks.
#[derive(Debug)]
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
}

impl JwtService {
    /// Creates a new JWT service.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
        }
    }

    /// Encodes claims into a JWT string.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = self.signing_key.kid.clone();

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes and validates a JWT string: signature, issuer and expiry,
    /// with no leeway.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        decode(token, &self.signing_key.decoding_key, &self.validation(true))
            .map_err(JwtError::from)
    }

    /// Decodes a JWT without validating expiration.
    ///
    /// # Errors
    /// Returns an error if decoding fails (signature is still validated).
    pub fn decode_allow_expired<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<TokenData<T>, JwtError> {
        decode(token, &self.signing_key.decoding_key, &self.validation(false))
            .map_err(JwtError::from)
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_exp = validate_exp;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

// ============================================================================
// Tests
// ============================================================================
