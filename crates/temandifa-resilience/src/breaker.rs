//! Circuit breaker for one downstream operation kind.
//!
//! ## State machine
//!
//! - **Closed**: calls pass. Outcomes are counted within a fixed interval;
//!   once `min_requests` is reached and the failure ratio meets the
//!   threshold, the breaker opens.
//! - **Open**: calls are rejected with [`BreakerError::Open`] without touching
//!   the downstream. After `open_timeout` the breaker turns half-open.
//! - **HalfOpen**: up to `half_open_max_calls` trials are admitted. Any trial
//!   failure reopens the breaker; once every admitted trial has completed
//!   successfully it closes.
//!
//! Each state change starts a new generation. Outcomes reported against an
//! older generation are ignored, so a slow call that started while closed
//! cannot close a breaker that has since opened.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::Instant;

use temandifa_core::{OperationKind, metrics};

use crate::config::BreakerConfig;

/// Retry hint when half-open trial slots are all taken.
const HALF_OPEN_RETRY_AFTER: Duration = Duration::from_secs(1);

// ============================================================================
// Public types
// ============================================================================

/// Breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 open, 2 half-open.
    #[must_use]
    pub fn gauge_value(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Call counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Calls admitted, including ones still running.
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
}

impl Counts {
    fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.failures) / f64::from(self.requests)
        }
    }
}

/// A state transition, published on the manager's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerEvent {
    pub kind: OperationKind,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: OffsetDateTime,
}

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call; the downstream was not invoked.
    #[error("circuit breaker {} is open", .kind.breaker_name())]
    Open {
        kind: OperationKind,
        /// How long until a call may be admitted again.
        retry_after: Duration,
    },

    /// The downstream call exceeded its timeout.
    #[error("{kind} call timed out after {}ms", .after.as_millis())]
    Timeout { kind: OperationKind, after: Duration },

    /// The downstream call failed.
    #[error("{kind} call failed: {source}")]
    Downstream {
        kind: OperationKind,
        #[source]
        source: E,
    },
}

impl<E> BreakerError<E> {
    /// `true` for the breaker-open sentinel.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Open { kind, .. } | Self::Timeout { kind, .. } | Self::Downstream { kind, .. } => {
                *kind
            }
        }
    }

    /// Retry hint, present only for rejections.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Open { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

// ============================================================================
// Breaker
// ============================================================================

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Half-open trials admitted but not yet finished.
    in_flight: u32,
    /// End of the counting interval (closed) or of the open timeout (open).
    expiry: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub kind: OperationKind,
    pub name: &'static str,
    pub state: CircuitState,
    pub counts: Counts,
}

/// Circuit breaker guarding one operation kind.
///
/// The mutex is held only for bookkeeping, never across the downstream call.
pub struct CircuitBreaker {
    kind: OperationKind,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    pub fn new(kind: OperationKind, config: BreakerConfig, events: broadcast::Sender<BreakerEvent>) -> Self {
        let now = Instant::now();
        metrics::set_breaker_state(kind.breaker_name(), CircuitState::Closed.gauge_value());
        Self {
            kind,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                in_flight: 0,
                expiry: now.checked_add(config.policy.interval),
            }),
            config,
            events,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.breaker_name()
    }

    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, applying any timer-driven transition first.
    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.refresh(&mut inner, Instant::now());
            (inner.state, transition)
        };
        self.publish(transition);
        state
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        BreakerSnapshot {
            kind: self.kind,
            name: self.name(),
            state,
            counts: self.counts(),
        }
    }

    /// Run `call` under the breaker with this kind's timeout.
    ///
    /// Dropping the returned future abandons the call without counting it as
    /// a success or failure.
    pub async fn call<T, E, F>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let generation = match self.before_call() {
            Ok(generation) => generation,
            Err(retry_after) => {
                metrics::record_breaker_call(self.name(), "rejected");
                tracing::debug!(breaker = self.name(), "call rejected by open circuit");
                return Err(BreakerError::Open {
                    kind: self.kind,
                    retry_after,
                });
            }
        };

        let mut guard = CallGuard {
            breaker: self,
            generation,
            settled: false,
        };
        let timeout = self.config.call_timeout;
        let outcome = tokio::time::timeout(timeout, call).await;
        guard.settled = true;

        match outcome {
            Ok(Ok(value)) => {
                self.after_call(generation, true);
                metrics::record_breaker_call(self.name(), "success");
                Ok(value)
            }
            Ok(Err(source)) => {
                self.after_call(generation, false);
                metrics::record_breaker_call(self.name(), "failure");
                Err(BreakerError::Downstream {
                    kind: self.kind,
                    source,
                })
            }
            Err(_) => {
                self.after_call(generation, false);
                metrics::record_breaker_call(self.name(), "timeout");
                tracing::warn!(
                    breaker = self.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "downstream call timed out"
                );
                Err(BreakerError::Timeout {
                    kind: self.kind,
                    after: timeout,
                })
            }
        }
    }

    /// Admit or reject a call. Returns the generation to report against, or
    /// the retry hint.
    fn before_call(&self) -> Result<u64, Duration> {
        let (result, transition) = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let transition = self.refresh(&mut inner, now);

            let result = match inner.state {
                CircuitState::Open => Err(inner
                    .expiry
                    .map_or(self.config.policy.open_timeout, |at| at.saturating_duration_since(now))),
                CircuitState::HalfOpen if inner.counts.requests >= self.config.policy.half_open_max_calls => {
                    Err(HALF_OPEN_RETRY_AFTER)
                }
                CircuitState::HalfOpen => {
                    inner.counts.requests += 1;
                    inner.in_flight += 1;
                    Ok(inner.generation)
                }
                CircuitState::Closed => {
                    inner.counts.requests += 1;
                    Ok(inner.generation)
                }
            };
            (result, transition)
        };
        self.publish(transition);
        result
    }

    fn after_call(&self, generation: u64, success: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let refreshed = self.refresh(&mut inner, now);
            if generation != inner.generation {
                refreshed
            } else if success {
                self.on_success(&mut inner, now).or(refreshed)
            } else {
                self.on_failure(&mut inner, now).or(refreshed)
            }
        };
        self.publish(transition);
    }

    /// Forget an admitted call that never finished.
    fn release(&self, generation: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            if generation != inner.generation {
                None
            } else {
                inner.counts.requests = inner.counts.requests.saturating_sub(1);
                if inner.state == CircuitState::HalfOpen {
                    inner.in_flight = inner.in_flight.saturating_sub(1);
                    self.close_if_trials_passed(&mut inner, Instant::now())
                } else {
                    None
                }
            }
        };
        self.publish(transition);
    }

    fn on_success(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        inner.counts.successes += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.in_flight = inner.in_flight.saturating_sub(1);
                self.close_if_trials_passed(inner, now)
            }
            _ => None,
        }
    }

    fn on_failure(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        inner.counts.failures += 1;
        match inner.state {
            CircuitState::Closed => {
                let policy = &self.config.policy;
                let ready_to_trip = inner.counts.requests >= policy.min_requests
                    && inner.counts.failure_ratio() >= policy.failure_ratio;
                if ready_to_trip {
                    tracing::debug!(
                        breaker = self.name(),
                        requests = inner.counts.requests,
                        failures = inner.counts.failures,
                        "failure threshold reached"
                    );
                    Some(self.set_state(inner, CircuitState::Open, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => Some(self.set_state(inner, CircuitState::Open, now)),
            CircuitState::Open => None,
        }
    }

    fn close_if_trials_passed(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        let trials_passed =
            inner.in_flight == 0 && inner.counts.failures == 0 && inner.counts.successes > 0;
        trials_passed.then(|| self.set_state(inner, CircuitState::Closed, now))
    }

    /// Apply timer-driven changes: roll the closed interval, or move an
    /// expired open breaker to half-open.
    fn refresh(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        let expired = inner.expiry.is_some_and(|at| at <= now);
        match inner.state {
            CircuitState::Closed if expired => {
                self.new_generation(inner, now);
                None
            }
            CircuitState::Open if expired => Some(self.set_state(inner, CircuitState::HalfOpen, now)),
            _ => None,
        }
    }

    fn set_state(&self, inner: &mut Inner, to: CircuitState, now: Instant) -> Transition {
        let from = inner.state;
        inner.state = to;
        self.new_generation(inner, now);
        Transition { from, to }
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.in_flight = 0;
        let policy = &self.config.policy;
        inner.expiry = match inner.state {
            CircuitState::Closed => now.checked_add(policy.interval),
            CircuitState::Open => now.checked_add(policy.open_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    /// Emit a transition. Called after the lock is released.
    fn publish(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        tracing::warn!(
            breaker = self.name(),
            from = %from,
            to = %to,
            "circuit breaker state changed"
        );
        metrics::set_breaker_state(self.name(), to.gauge_value());
        // No subscribers is fine.
        let _ = self.events.send(BreakerEvent {
            kind: self.kind,
            from,
            to,
            at: OffsetDateTime::now_utc(),
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

/// Releases an admitted slot if the call future is dropped mid-flight.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerPolicy;

    fn breaker() -> (CircuitBreaker, broadcast::Receiver<BreakerEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let config = BreakerConfig {
            policy: BreakerPolicy::default(),
            call_timeout: Duration::from_secs(5),
        };
        (CircuitBreaker::new(OperationKind::Detect, config, tx), rx)
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        b.call(async { Ok::<_, String>(1) }).await
    }

    async fn fail(b: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        b.call(async { Err::<u32, _>("boom".to_string()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_at_threshold() {
        let (b, mut events) = breaker();
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
        // 5 requests, 3 failures: ratio 0.6.
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, OperationKind::Detect);
        assert_eq!((event.from, event.to), (CircuitState::Closed, CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_min_requests_never_trips() {
        let (b, _events) = breaker();
        for _ in 0..4 {
            fail(&b).await.unwrap_err();
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_calling() {
        let (b, _events) = breaker();
        for _ in 0..5 {
            fail(&b).await.unwrap_err();
        }

        let mut invoked = false;
        let err = b
            .call(async {
                invoked = true;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_open());
        assert!(!invoked);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_success_closes() {
        let (b, mut events) = breaker();
        for _ in 0..5 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.counts(), Counts::default());

        let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| (e.from, e.to))
            .collect();
        assert_eq!(
            seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_resets_timeout() {
        let (b, _events) = breaker();
        for _ in 0..5 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_resets_counts() {
        let (b, _events) = breaker();
        for _ in 0..4 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.counts().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (tx, _rx) = broadcast::channel(16);
        let config = BreakerConfig {
            policy: BreakerPolicy {
                min_requests: 1,
                ..BreakerPolicy::default()
            },
            call_timeout: Duration::from_millis(100),
        };
        let b = CircuitBreaker::new(OperationKind::Ocr, config, tx);

        let err = b
            .call(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BreakerError::Timeout { kind: OperationKind::Ocr, .. }));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_releases_half_open_slot() {
        let (tx, _rx) = broadcast::channel(16);
        let config = BreakerConfig {
            policy: BreakerPolicy {
                half_open_max_calls: 1,
                ..BreakerPolicy::default()
            },
            call_timeout: Duration::from_secs(5),
        };
        let b = CircuitBreaker::new(OperationKind::Vqa, config, tx);
        for _ in 0..5 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        {
            let pending = b.call(std::future::pending::<Result<(), String>>());
            tokio::pin!(pending);
            assert!(futures_util::poll!(pending.as_mut()).is_pending());
            // Slot taken: a second caller is turned away.
            assert!(fail(&b).await.unwrap_err().is_open());
        }

        // The abandoned trial no longer occupies the slot.
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_display_and_gauge() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(CircuitState::Open.gauge_value(), 1);
        let err: BreakerError<String> = BreakerError::Open {
            kind: OperationKind::Ocr,
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "circuit breaker ai-ocr is open");
    }
}
