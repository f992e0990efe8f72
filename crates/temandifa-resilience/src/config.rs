//! Breaker and rate limit configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [breaker.defaults]
//! interval = "60s"
//! open_timeout = "30s"
//! min_requests = 5
//! failure_ratio = 0.6
//! half_open_max_calls = 3
//!
//! [breaker.timeouts]
//! vqa = "90s"
//!
//! [breaker.overrides.transcribe]
//! open_timeout = "2m"
//!
//! [rate_limit.public]
//! limit = 60
//! window = "60s"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use temandifa_core::OperationKind;

// ============================================================================
// Circuit breaker
// ============================================================================

/// Trip and recovery thresholds for one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicy {
    /// Length of the closed-state counting interval. Counts reset when it ends.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Time spent open before trial calls are allowed.
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,

    /// Minimum calls in the interval before the ratio is considered.
    pub min_requests: u32,

    /// Failure ratio at or above which the breaker opens.
    pub failure_ratio: f64,

    /// Trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
            min_requests: 5,
            failure_ratio: 0.6,
            half_open_max_calls: 3,
        }
    }
}

impl BreakerPolicy {
    pub fn validate(&self, path: &str) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err(format!("{path}.interval must be > 0"));
        }
        if self.open_timeout.is_zero() {
            return Err(format!("{path}.open_timeout must be > 0"));
        }
        if self.min_requests == 0 {
            return Err(format!("{path}.min_requests must be > 0"));
        }
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(format!("{path}.failure_ratio must be in (0, 1]"));
        }
        if self.half_open_max_calls == 0 {
            return Err(format!("{path}.half_open_max_calls must be > 0"));
        }
        Ok(())
    }
}

/// Per-kind downstream call timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallTimeouts {
    #[serde(with = "humantime_serde")]
    pub detect: Duration,
    #[serde(with = "humantime_serde")]
    pub ocr: Duration,
    #[serde(with = "humantime_serde")]
    pub transcribe: Duration,
    #[serde(with = "humantime_serde")]
    pub vqa: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            detect: Duration::from_secs(30),
            ocr: Duration::from_secs(45),
            transcribe: Duration::from_secs(60),
            vqa: Duration::from_secs(90),
        }
    }
}

impl CallTimeouts {
    #[must_use]
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Detect => self.detect,
            OperationKind::Ocr => self.ocr,
            OperationKind::Transcribe => self.transcribe,
            OperationKind::Vqa => self.vqa,
        }
    }
}

/// Partial policy for one kind. Unset fields inherit the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerOverride {
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub open_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_calls: Option<u32>,
}

impl BreakerOverride {
    fn apply(&self, base: &BreakerPolicy) -> BreakerPolicy {
        BreakerPolicy {
            interval: self.interval.unwrap_or(base.interval),
            open_timeout: self.open_timeout.unwrap_or(base.open_timeout),
            min_requests: self.min_requests.unwrap_or(base.min_requests),
            failure_ratio: self.failure_ratio.unwrap_or(base.failure_ratio),
            half_open_max_calls: self.half_open_max_calls.unwrap_or(base.half_open_max_calls),
        }
    }
}

/// Resolved configuration for a single breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub policy: BreakerPolicy,
    pub call_timeout: Duration,
}

/// Circuit breaker configuration for every operation kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Policy applied to every kind unless overridden.
    pub defaults: BreakerPolicy,
    /// Downstream call timeout per kind.
    pub timeouts: CallTimeouts,
    /// Per-kind policy overrides.
    pub overrides: HashMap<OperationKind, BreakerOverride>,
}

impl BreakerSettings {
    /// Effective configuration for `kind`.
    #[must_use]
    pub fn config_for(&self, kind: OperationKind) -> BreakerConfig {
        let policy = match self.overrides.get(&kind) {
            Some(over) => over.apply(&self.defaults),
            None => self.defaults.clone(),
        };
        BreakerConfig {
            policy,
            call_timeout: self.timeouts.for_kind(kind),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for kind in OperationKind::ALL {
            let config = self.config_for(kind);
            config.policy.validate(&format!("breaker[{kind}]"))?;
            if config.call_timeout.is_zero() {
                return Err(format!("breaker.timeouts.{kind} must be > 0"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Longest accepted rate limit window, and longest idle expiry buffer.
pub const MAX_RATE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum requests per trailing window. Unset fields fall back to 60
/// requests per 60 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRule {
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(60, Duration::from_secs(60))
    }
}

impl RateLimitRule {
    #[must_use]
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    fn validate(&self, path: &str) -> Result<(), String> {
        if self.limit == 0 {
            return Err(format!("{path}.limit must be > 0"));
        }
        if self.window < Duration::from_millis(1) {
            return Err(format!("{path}.window must be at least 1ms"));
        }
        if self.window > MAX_RATE_WINDOW {
            return Err(format!("{path}.window must be at most 24h"));
        }
        Ok(())
    }
}

/// Rate limiter configuration for both scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Anonymous and public endpoints, keyed by client address.
    pub public: RateLimitRule,
    /// Protected, resource-intensive endpoints, keyed by user id.
    pub authenticated: RateLimitRule,
    /// Added to the window when setting the idle expiry of a caller's set.
    #[serde(with = "humantime_serde")]
    pub expiry_buffer: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            public: RateLimitRule::new(60, Duration::from_secs(60)),
            authenticated: RateLimitRule::new(10, Duration::from_secs(60)),
            expiry_buffer: Duration::from_secs(1),
        }
    }
}

impl RateLimitSettings {
    pub fn validate(&self) -> Result<(), String> {
        self.public.validate("rate_limit.public")?;
        self.authenticated.validate("rate_limit.authenticated")?;
        if self.expiry_buffer > MAX_RATE_WINDOW {
            return Err("rate_limit.expiry_buffer must be at most 24h".to_string());
        }
        Ok(())
    }
}
