//! Sliding-window rate limiting over the shared store.
//!
//! Each caller owns a sorted set under `sliding_rate:<scope>:<caller>` whose
//! members are scored by arrival time. A check prunes entries that fell out of
//! the window, records the new arrival, counts, and refreshes the set's idle
//! expiry, all in one atomic store operation. Concurrent checks for the same
//! caller therefore see strictly increasing counts and can never jointly
//! admit more than `limit` requests.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use temandifa_core::{metrics, now_utc, saturating_add, unix_nanos};
use temandifa_store::{KeyValueStore, StoreBackend, WindowProbe, keys};

use crate::config::{RateLimitRule, RateLimitSettings};

// ============================================================================
// Caller identity
// ============================================================================

/// Which limiter instance a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// Anonymous and public endpoints.
    Public,
    /// Protected, resource-intensive endpoints.
    Authenticated,
}

impl LimitScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity a window is kept for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerKey {
    /// Client network address.
    Ip(String),
    /// Authenticated user id.
    User(String),
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "ip:{addr}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    /// Requests left in the current window. Zero once the limit is reached.
    pub remaining: u64,
    /// When a rejected caller can expect capacity again.
    pub reset_at: OffsetDateTime,
    pub window: Duration,
    /// The store could not be reached and the request was let through.
    pub degraded: bool,
}

impl RateDecision {
    fn from_count(count: u64, limit: u64, window: Duration, now: OffsetDateTime) -> Self {
        Self {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: saturating_add(now, window),
            window,
            degraded: false,
        }
    }

    fn degraded(limit: u64, window: Duration, now: OffsetDateTime) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: saturating_add(now, window),
            window,
            degraded: true,
        }
    }

    /// Retry hint for rejected callers: the whole window, rounded up to
    /// whole seconds.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        if self.allowed {
            return None;
        }
        let secs = self.window.as_secs() + u64::from(self.window.subsec_nanos() > 0);
        Some(Duration::from_secs(secs.max(1)))
    }

    /// Standard rate limit response headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.unix_timestamp().to_string()),
        ];
        if let Some(retry) = self.retry_after() {
            headers.push(("Retry-After", retry.as_secs().to_string()));
        }
        headers
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// One rate limiter instance.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn KeyValueStore>,
    scope: LimitScope,
    rule: RateLimitRule,
    expiry_buffer: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        scope: LimitScope,
        rule: RateLimitRule,
        expiry_buffer: Duration,
    ) -> Self {
        Self {
            store,
            scope,
            rule,
            expiry_buffer,
        }
    }

    /// The public and authenticated limiters from settings.
    pub fn pair(store: Arc<dyn KeyValueStore>, settings: &RateLimitSettings) -> (Self, Self) {
        (
            Self::new(store.clone(), LimitScope::Public, settings.public, settings.expiry_buffer),
            Self::new(
                store,
                LimitScope::Authenticated,
                settings.authenticated,
                settings.expiry_buffer,
            ),
        )
    }

    #[must_use]
    pub fn scope(&self) -> LimitScope {
        self.scope
    }

    #[must_use]
    pub fn rule(&self) -> RateLimitRule {
        self.rule
    }

    /// Store key for a caller's window.
    pub fn key_for(&self, caller: &CallerKey) -> String {
        keys::join(keys::SLIDING_RATE, &format!("{}:{caller}", self.scope))
    }

    /// Check against this limiter's configured rule.
    pub async fn admit(&self, caller: &CallerKey) -> RateDecision {
        self.check(caller, self.rule.limit, self.rule.window).await
    }

    /// Record an arrival for `caller` and decide whether it is within `limit`
    /// requests per trailing `window`.
    ///
    /// Rejected arrivals are recorded too, so a caller hammering past the
    /// limit stays limited. Store failures fail open.
    pub async fn check(&self, caller: &CallerKey, limit: u64, window: Duration) -> RateDecision {
        let now = now_utc();
        let key = self.key_for(caller);
        let score = unix_nanos(now);
        let window_nanos = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX);
        let probe = WindowProbe {
            score,
            window_start: score.saturating_sub(window_nanos),
            member: format!("{score}-{}", Uuid::new_v4().simple()),
            ttl: window.saturating_add(self.expiry_buffer),
        };

        match self.store.window_probe(&key, &probe).await {
            Ok(count) => {
                let decision = RateDecision::from_count(count, limit, window, now);
                if !decision.allowed {
                    metrics::record_rate_limit_rejection(self.scope.as_str());
                    tracing::debug!(
                        scope = %self.scope,
                        caller = %caller,
                        count,
                        limit,
                        "rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                metrics::record_rate_limit_degraded(self.scope.as_str());
                if self.store.backend() == StoreBackend::Unavailable {
                    tracing::debug!(scope = %self.scope, "rate limiting skipped: no store configured");
                } else {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Rate limit store unavailable, allowing request"
                    );
                }
                RateDecision::degraded(limit, window, now)
            }
        }
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("backend", &self.store.backend())
            .field("scope", &self.scope)
            .field("rule", &self.rule)
            .field("expiry_buffer", &self.expiry_buffer)
            .finish()
    }
}
