//! One circuit breaker per downstream operation kind.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use temandifa_core::OperationKind;

use crate::breaker::{BreakerError, BreakerEvent, BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::config::BreakerSettings;

/// Capacity of the transition event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct Breakers {
    detect: CircuitBreaker,
    ocr: CircuitBreaker,
    transcribe: CircuitBreaker,
    vqa: CircuitBreaker,
}

impl Breakers {
    fn get(&self, kind: OperationKind) -> &CircuitBreaker {
        match kind {
            OperationKind::Detect => &self.detect,
            OperationKind::Ocr => &self.ocr,
            OperationKind::Transcribe => &self.transcribe,
            OperationKind::Vqa => &self.vqa,
        }
    }
}

/// Registry of breakers, built once at startup and shared by handle.
///
/// Breakers for different kinds are independent: tripping `ai-vqa` leaves
/// `ai-detect` untouched.
#[derive(Debug, Clone)]
pub struct BreakerManager {
    breakers: Arc<Breakers>,
    events: broadcast::Sender<BreakerEvent>,
}

impl BreakerManager {
    pub fn new(settings: &BreakerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let build = |kind| CircuitBreaker::new(kind, settings.config_for(kind), events.clone());
        let breakers = Breakers {
            detect: build(OperationKind::Detect),
            ocr: build(OperationKind::Ocr),
            transcribe: build(OperationKind::Transcribe),
            vqa: build(OperationKind::Vqa),
        };
        tracing::debug!(count = OperationKind::ALL.len(), "circuit breakers initialized");
        Self {
            breakers: Arc::new(breakers),
            events,
        }
    }

    /// Run `call` under the breaker for `kind`.
    ///
    /// Rejected calls return [`BreakerError::Open`] without invoking the
    /// downstream. Timeouts and downstream errors count toward tripping.
    pub async fn execute<T, E, F>(&self, kind: OperationKind, call: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.breakers.get(kind).call(call).await
    }

    pub fn breaker(&self, kind: OperationKind) -> &CircuitBreaker {
        self.breakers.get(kind)
    }

    pub fn state(&self, kind: OperationKind) -> CircuitState {
        self.breakers.get(kind).state()
    }

    /// Snapshot of every breaker, in [`OperationKind::ALL`] order.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        OperationKind::ALL
            .iter()
            .map(|kind| self.breakers.get(*kind).snapshot())
            .collect()
    }

    /// Receive state transitions from every breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }
}
