//! Token lifecycle error types.
//!
//! Variants are split so the boundary can tell a client to re-authenticate
//! (expired), that the session was ended (revoked, blacklisted) or that the
//! request itself is wrong (malformed, wrong token type).

use std::fmt;

use temandifa_store::StoreError;

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// The refresh token was already used or explicitly revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// The token failed structural or signature checks.
    #[error("Malformed token: {message}")]
    TokenMalformed {
        /// Description of what failed.
        message: String,
    },

    /// A token of another type was presented.
    #[error("Token type mismatch: expected {expected}, got {actual}")]
    TokenTypeMismatch {
        /// Type the operation accepts.
        expected: &'static str,
        /// Type carried by the token.
        actual: String,
    },

    /// The access token was invalidated by logout.
    #[error("Token blacklisted")]
    TokenBlacklisted,

    /// No stored record matches the presented refresh token.
    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    /// Token state could not be read or written.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The token configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `TokenMalformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::TokenMalformed {
            message: message.into(),
        }
    }

    /// Creates a new `TokenTypeMismatch` error.
    #[must_use]
    pub fn type_mismatch(expected: &'static str, actual: impl Into<String>) -> Self {
        Self::TokenTypeMismatch {
            expected,
            actual: actual.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::TokenRevoked
                | Self::TokenMalformed { .. }
                | Self::TokenTypeMismatch { .. }
                | Self::TokenBlacklisted
                | Self::RefreshTokenNotFound
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if the session is over and the client must log in again.
    #[must_use]
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            Self::TokenRevoked | Self::TokenBlacklisted | Self::RefreshTokenNotFound
        )
    }

    /// Returns `true` if this is a token-related error.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        self.category() == ErrorCategory::Token
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TokenExpired
            | Self::TokenRevoked
            | Self::TokenMalformed { .. }
            | Self::TokenTypeMismatch { .. }
            | Self::TokenBlacklisted
            | Self::RefreshTokenNotFound => ErrorCategory::Token,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Stable client-facing error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::TokenMalformed { .. } => "token_invalid",
            Self::TokenTypeMismatch { .. } => "token_type_invalid",
            Self::TokenBlacklisted => "token_revoked",
            Self::RefreshTokenNotFound => "refresh_token_invalid",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }

    /// Label used for the validation failure metric.
    #[must_use]
    pub fn metric_reason(&self) -> &'static str {
        match self {
            Self::TokenExpired => "expired",
            Self::TokenRevoked => "revoked",
            Self::TokenMalformed { .. } => "malformed",
            Self::TokenTypeMismatch { .. } => "type_mismatch",
            Self::TokenBlacklisted => "blacklisted",
            Self::RefreshTokenNotFound => "not_found",
            Self::Storage { .. } => "storage",
            Self::Configuration { .. } | Self::Internal { .. } => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(format!("corrupt token record: {err}"))
    }
}

/// Categories of token errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token validation, expiry and revocation.
    Token,
    /// Store errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Result type for token operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
        assert_eq!(
            AuthError::type_mismatch("access", "refresh").to_string(),
            "Token type mismatch: expected access, got refresh"
        );
        assert_eq!(
            AuthError::malformed("bad signature").to_string(),
            "Malformed token: bad signature"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::TokenExpired.is_client_error());
        assert!(!AuthError::TokenExpired.is_session_ended());
        assert!(AuthError::TokenBlacklisted.is_session_ended());
        assert!(AuthError::TokenRevoked.is_token_error());

        let err = AuthError::storage("redis down");
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::Infrastructure);
    }

    #[test]
    fn test_error_codes_distinguish_outcomes() {
        assert_eq!(AuthError::TokenExpired.error_code(), "token_expired");
        assert_eq!(AuthError::TokenRevoked.error_code(), "token_revoked");
        assert_eq!(AuthError::malformed("x").error_code(), "token_invalid");
        assert_eq!(AuthError::internal("x").error_code(), "server_error");
    }

    #[test]
    fn test_from_store_error() {
        let err: AuthError = StoreError::unavailable("connection refused").into();
        assert!(matches!(err, AuthError::Storage { .. }));
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
