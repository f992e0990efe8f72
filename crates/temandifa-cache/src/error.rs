//! Cache error types.
//!
//! Lookups and background writes never surface errors; these cover the
//! administrative and serialization paths only.

use temandifa_store::StoreError;

/// Errors that can occur during cache administration.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The prefix is empty or owned by another component.
    #[error("Invalid cache prefix '{prefix}': {reason}")]
    InvalidPrefix {
        /// The rejected prefix.
        prefix: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The store failed part-way through a prefix clear.
    #[error("Cleared {deleted} keys before store failure: {source}")]
    PartialClear {
        /// Keys deleted before the failure.
        deleted: u64,
        /// The store failure.
        #[source]
        source: StoreError,
    },

    /// A direct store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A value could not be serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `InvalidPrefix` error.
    #[must_use]
    pub fn invalid_prefix(prefix: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPrefix {
            prefix: prefix.into(),
            reason,
        }
    }

    /// Keys removed before the error, for partial operations.
    #[must_use]
    pub fn deleted_so_far(&self) -> u64 {
        match self {
            Self::PartialClear { deleted, .. } => *deleted,
            _ => 0,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Type alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
