//! # temandifa-resilience
//!
//! Failure isolation and admission control for the Temandifa gateway.
//!
//! - [`breaker`] - per-kind circuit breaker state machine
//! - [`manager`] - registry of independent breakers with transition events
//! - [`rate_limit`] - sliding-window limiter over the shared store
//! - [`config`] - breaker policies, call timeouts and rate limit rules

pub mod breaker;
pub mod config;
pub mod manager;
pub mod rate_limit;

pub use breaker::{BreakerError, BreakerEvent, BreakerSnapshot, CircuitBreaker, CircuitState, Counts};
pub use config::{
    BreakerConfig, BreakerOverride, BreakerPolicy, BreakerSettings, CallTimeouts, RateLimitRule,
    RateLimitSettings,
};
pub use manager::BreakerManager;
pub use rate_limit::{CallerKey, LimitScope, RateDecision, SlidingWindowLimiter};
