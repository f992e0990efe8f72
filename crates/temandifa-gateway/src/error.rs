//! Boundary error taxonomy.
//!
//! Component errors are translated here into what a client sees: a status
//! code, a stable error code and, for rejections, a retry hint.

use std::time::Duration;

use temandifa_auth::AuthError;
use temandifa_core::OperationKind;
use temandifa_resilience::{BreakerError, LimitScope, RateDecision};

use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The caller exceeded its request budget.
    #[error("Rate limit exceeded for {scope} scope")]
    RateLimited {
        scope: LimitScope,
        retry_after: Duration,
        /// Rate limit headers for the response.
        headers: Vec<(&'static str, String)>,
    },

    /// The breaker for this operation is open; the backend was not called.
    #[error("{} is temporarily unavailable", .kind)]
    BreakerOpen {
        kind: OperationKind,
        retry_after: Duration,
    },

    #[error("{kind} timed out after {}ms", .after.as_millis())]
    DownstreamTimeout { kind: OperationKind, after: Duration },

    #[error("{kind} failed: {message}")]
    DownstreamFailure { kind: OperationKind, message: String },

    /// No bearer token on a protected request.
    #[error("Authorization header required")]
    MissingCredentials,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Rejection for a denied rate limit decision.
    #[must_use]
    pub fn rate_limited(scope: LimitScope, decision: &RateDecision) -> Self {
        Self::RateLimited {
            scope,
            retry_after: decision.retry_after().unwrap_or(decision.window),
            headers: decision.headers(),
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited { .. } => 429,
            Self::BreakerOpen { .. } => 503,
            Self::DownstreamTimeout { .. } => 504,
            Self::DownstreamFailure { .. } => 502,
            Self::MissingCredentials => 401,
            Self::Auth(e) => match e {
                AuthError::Storage { .. } => 503,
                e if e.is_server_error() => 500,
                _ => 401,
            },
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::BreakerOpen { .. } => "service_unavailable",
            Self::DownstreamTimeout { .. } => "inference_timeout",
            Self::DownstreamFailure { .. } => "inference_failed",
            Self::MissingCredentials => "unauthorized",
            Self::Auth(e) => e.error_code(),
        }
    }

    /// Retry hint for rejections the client should back off from.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::BreakerOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

impl From<BreakerError<BackendError>> for GatewayError {
    fn from(err: BreakerError<BackendError>) -> Self {
        match err {
            BreakerError::Open { kind, retry_after } => Self::BreakerOpen { kind, retry_after },
            BreakerError::Timeout { kind, after } => Self::DownstreamTimeout { kind, after },
            BreakerError::Downstream { kind, source } => Self::DownstreamFailure {
                kind,
                message: source.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_errors_map() {
        let open: GatewayError = BreakerError::<BackendError>::Open {
            kind: OperationKind::Vqa,
            retry_after: Duration::from_secs(12),
        }
        .into();
        assert_eq!(open.status_code(), 503);
        assert_eq!(open.retry_after(), Some(Duration::from_secs(12)));

        let timeout: GatewayError = BreakerError::<BackendError>::Timeout {
            kind: OperationKind::Ocr,
            after: Duration::from_secs(45),
        }
        .into();
        assert_eq!(timeout.status_code(), 504);
        assert_eq!(timeout.retry_after(), None);

        let failed: GatewayError = BreakerError::Downstream {
            kind: OperationKind::Detect,
            source: BackendError::failed("model crashed"),
        }
        .into();
        assert_eq!(failed.error_code(), "inference_failed");
        assert!(failed.to_string().contains("model crashed"));
    }

    #[test]
    fn test_auth_errors_map() {
        assert_eq!(GatewayError::from(AuthError::TokenExpired).status_code(), 401);
        assert_eq!(GatewayError::from(AuthError::TokenExpired).error_code(), "token_expired");
        assert_eq!(GatewayError::from(AuthError::storage("down")).status_code(), 503);
        assert_eq!(GatewayError::from(AuthError::internal("bug")).status_code(), 500);
        assert_eq!(GatewayError::MissingCredentials.status_code(), 401);
    }
}
