//! Inference orchestration: cache lookup, breaker-guarded backend call,
//! background write-back.

use std::sync::Arc;
use std::time::Instant;

use temandifa_cache::CacheAside;
use temandifa_core::metrics;
use temandifa_resilience::{BreakerError, BreakerManager};

use crate::backend::{InferenceBackend, InferenceRequest};
use crate::error::{GatewayError, GatewayResult};

/// Result of [`InferenceService::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceOutcome {
    pub payload: Vec<u8>,
    /// Served from cache without calling the backend.
    pub cached: bool,
}

#[derive(Clone)]
pub struct InferenceService {
    cache: CacheAside,
    breakers: BreakerManager,
    backend: Arc<dyn InferenceBackend>,
}

impl InferenceService {
    pub fn new(cache: CacheAside, breakers: BreakerManager, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            cache,
            breakers,
            backend,
        }
    }

    /// Serve `request` from cache, or call the backend under its breaker and
    /// cache the result in the background.
    ///
    /// Failed calls are never cached. The write-back is detached, so the
    /// result is cached even if the caller goes away.
    pub async fn run(&self, request: &InferenceRequest) -> GatewayResult<InferenceOutcome> {
        let started = Instant::now();
        let kind = request.kind;
        let key = self
            .cache
            .fingerprint(kind.cache_prefix(), &request.fingerprint_parts());

        if let Some(payload) = self.cache.get(&key).await {
            metrics::record_inference(kind.as_str(), true, started.elapsed());
            return Ok(InferenceOutcome {
                payload,
                cached: true,
            });
        }

        let payload = self
            .breakers
            .execute(kind, self.backend.infer(request))
            .await
            .map_err(|e| {
                match &e {
                    BreakerError::Open { .. } => {
                        tracing::debug!(operation = %kind, "inference rejected, breaker open");
                    }
                    BreakerError::Timeout { after, .. } => {
                        tracing::warn!(operation = %kind, timeout_ms = after.as_millis() as u64, "Inference timed out");
                    }
                    BreakerError::Downstream { source, .. } => {
                        tracing::error!(operation = %kind, error = %source, "Inference backend call failed");
                    }
                }
                GatewayError::from(e)
            })?;

        self.cache.set_async_for(kind, key, payload.clone());
        metrics::record_inference(kind.as_str(), false, started.elapsed());

        Ok(InferenceOutcome {
            payload,
            cached: false,
        })
    }

    pub fn breakers(&self) -> &BreakerManager {
        &self.breakers
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }
}
