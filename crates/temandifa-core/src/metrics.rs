//! Prometheus metrics for the Temandifa gateway.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs the Prometheus recorder.
//!
//! - Cache metrics (hits, misses, abandoned writes)
//! - Circuit breaker metrics (state gauge, call outcomes)
//! - Rate limiter metrics (rejections, fail-open degradations)
//! - Inference and token lifecycle metrics

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "temandifa_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "temandifa_cache_misses_total";
    pub const CACHE_WRITES_ABANDONED_TOTAL: &str = "temandifa_cache_writes_abandoned_total";

    // Circuit breaker metrics
    pub const CIRCUIT_BREAKER_STATE: &str = "temandifa_circuit_breaker_state";
    pub const CIRCUIT_BREAKER_REQUESTS_TOTAL: &str = "temandifa_circuit_breaker_requests_total";

    // Rate limiter metrics
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "temandifa_rate_limit_rejections_total";
    pub const RATE_LIMIT_DEGRADED_TOTAL: &str = "temandifa_rate_limit_degraded_total";

    // Inference metrics
    pub const INFERENCE_DURATION_SECONDS: &str = "temandifa_inference_duration_seconds";

    // Token lifecycle metrics
    pub const TOKENS_ISSUED_TOTAL: &str = "temandifa_tokens_issued_total";
    pub const TOKEN_VALIDATION_FAILURES_TOTAL: &str = "temandifa_token_validation_failures_total";
    pub const REFRESH_TOKENS_CLEANED_TOTAL: &str = "temandifa_refresh_tokens_cleaned_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(operation: &str) {
    counter!(names::CACHE_HITS_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_cache_miss(operation: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// A background cache write timed out or was cut off by shutdown.
pub fn record_cache_write_abandoned() {
    counter!(names::CACHE_WRITES_ABANDONED_TOTAL).increment(1);
}

// =============================================================================
// Circuit Breaker Metrics
// =============================================================================

/// Set the breaker state gauge: 0 closed, 1 open, 2 half-open.
pub fn set_breaker_state(name: &str, state_code: u8) {
    gauge!(names::CIRCUIT_BREAKER_STATE, "name" => name.to_string()).set(f64::from(state_code));
}

/// Record a breaker-guarded call. `outcome` is one of
/// `success`, `failure`, `timeout`, `rejected`.
pub fn record_breaker_call(name: &str, outcome: &'static str) {
    counter!(
        names::CIRCUIT_BREAKER_REQUESTS_TOTAL,
        "name" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// =============================================================================
// Rate Limiter Metrics
// =============================================================================

pub fn record_rate_limit_rejection(scope: &str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "scope" => scope.to_string()).increment(1);
}

/// The limiter could not reach the store and let the request through.
pub fn record_rate_limit_degraded(scope: &str) {
    counter!(names::RATE_LIMIT_DEGRADED_TOTAL, "scope" => scope.to_string()).increment(1);
}

// =============================================================================
// Inference Metrics
// =============================================================================

pub fn record_inference(operation: &str, cached: bool, duration: Duration) {
    histogram!(
        names::INFERENCE_DURATION_SECONDS,
        "operation" => operation.to_string(),
        "cache" => if cached { "hit" } else { "miss" }
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Token Metrics
// =============================================================================

pub fn record_tokens_issued() {
    counter!(names::TOKENS_ISSUED_TOTAL).increment(1);
}

pub fn record_token_validation_failure(reason: &'static str) {
    counter!(names::TOKEN_VALIDATION_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_refresh_tokens_cleaned(count: u64) {
    counter!(names::REFRESH_TOKENS_CLEANED_TOTAL).increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_hit("ocr");
        record_breaker_call("ai-ocr", "success");
        set_breaker_state("ai-ocr", 1);
        record_inference("ocr", false, Duration::from_millis(5));
    }

    #[test]
    fn test_names_share_prefix() {
        for name in [
            names::CACHE_HITS_TOTAL,
            names::CIRCUIT_BREAKER_STATE,
            names::RATE_LIMIT_REJECTIONS_TOTAL,
            names::TOKENS_ISSUED_TOTAL,
        ] {
            assert!(name.starts_with("temandifa_"));
        }
    }
}
