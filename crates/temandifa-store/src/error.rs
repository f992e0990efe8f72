//! Store error types.
//!
//! Every variant describes a store that is missing, unreachable or misbehaving.
//! Callers in the cache and rate limiter absorb these and degrade; the token
//! manager decides per configured policy.

/// Errors that can occur during key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No store is configured for this process.
    #[error("Store disabled")]
    Disabled,

    /// The store could not be reached or no pooled connection was available.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity problem.
        message: String,
    },

    /// The operation did not complete in time.
    #[error("Store operation timed out: {message}")]
    Timeout {
        /// The operation that timed out.
        message: String,
    },

    /// The store rejected or failed a command.
    #[error("Store command failed: {message}")]
    Command {
        /// Description of the command failure.
        message: String,
    },

    /// A stored value had an unexpected shape.
    #[error("Type mismatch for key {key}: expected {expected}")]
    WrongType {
        /// Key holding the value.
        key: String,
        /// Expected value kind.
        expected: &'static str,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a new `WrongType` error.
    #[must_use]
    pub fn wrong_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            key: key.into(),
            expected,
        }
    }

    /// Returns `true` if the store is absent or unreachable, as opposed to
    /// having rejected a specific command.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Disabled | Self::Unavailable { .. } | Self::Timeout { .. }
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::unavailable(err.to_string())
        } else {
            Self::command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Timeout(_) => Self::timeout(err.to_string()),
            _ => Self::unavailable(err.to_string()),
        }
    }
}

/// Type alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(StoreError::Disabled.is_connectivity());
        assert!(StoreError::unavailable("refused").is_connectivity());
        assert!(StoreError::timeout("GET").is_connectivity());
        assert!(!StoreError::command("WRONGTYPE").is_connectivity());
        assert!(!StoreError::wrong_type("k", "set").is_connectivity());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::unavailable("connection refused").to_string(),
            "Store unavailable: connection refused"
        );
        assert_eq!(StoreError::Disabled.to_string(), "Store disabled");
    }
}
