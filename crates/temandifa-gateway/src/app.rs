//! Composition root.
//!
//! [`Gateway`] owns one instance of every component, all sharing the same
//! store handle and background task registry. Shutdown drains that registry
//! within `shutdown.grace`.

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use temandifa_auth::TokenService;
use temandifa_cache::CacheAside;
use temandifa_core::{BackgroundTasks, DrainOutcome, metrics};
use temandifa_resilience::{BreakerManager, CircuitState, SlidingWindowLimiter};
use temandifa_store::{KeyValueStore, StoreBackend, connect_store};
use tokio::sync::broadcast::error::RecvError;

use crate::admission::Admission;
use crate::backend::InferenceBackend;
use crate::config::AppConfig;
use crate::inference::InferenceService;

pub struct Gateway {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    tasks: BackgroundTasks,
    cache: CacheAside,
    breakers: BreakerManager,
    tokens: Arc<TokenService>,
    admission: Admission,
}

impl Gateway {
    /// Connect to the store (falling back as configured) and build every
    /// component.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store = connect_store(&config.redis).await;
        Self::with_store(config, store)
    }

    /// Build every component over an existing store.
    pub fn with_store(config: AppConfig, store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let tasks = BackgroundTasks::new();
        let cache = CacheAside::new(store.clone(), tasks.clone(), config.cache.clone());
        let breakers = BreakerManager::new(&config.breaker);
        let (public, authenticated) = SlidingWindowLimiter::pair(store.clone(), &config.rate_limit);
        let tokens = Arc::new(
            TokenService::from_store(config.auth.clone(), store.clone())
                .context("failed to initialize token service")?,
        );
        let admission = Admission::new(public, authenticated, tokens.clone());

        tracing::info!(
            store = ?store.backend(),
            algorithm = ?config.auth.algorithm,
            "Gateway components initialized"
        );

        Ok(Self {
            config,
            store,
            tasks,
            cache,
            breakers,
            tokens,
            admission,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub fn breakers(&self) -> &BreakerManager {
        &self.breakers
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Inference orchestration over `backend`, sharing this gateway's cache
    /// and breakers.
    pub fn inference(&self, backend: Arc<dyn InferenceBackend>) -> InferenceService {
        InferenceService::new(self.cache.clone(), self.breakers.clone(), backend)
    }

    /// Prometheus exposition of every recorded metric. `None` until the
    /// recorder is installed with [`metrics::init_metrics`].
    pub fn metrics_text(&self) -> Option<String> {
        metrics::render_metrics()
    }

    /// Start background jobs: token cleanup, breaker alerting and, on the
    /// in-memory store, the expiry sweep.
    pub fn start(&self) {
        self.tokens.start_cleanup_task(&self.tasks);
        self.spawn_breaker_alerts();
        if self.store.backend() == StoreBackend::Memory {
            self.spawn_store_sweep();
        }
    }

    /// Start, wait for `shutdown`, then drain.
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start();
        tracing::info!("Gateway running");
        shutdown.await;
        let outcome = self.shutdown().await;
        if !outcome.completed {
            anyhow::bail!("{} background task(s) abandoned at shutdown", outcome.abandoned);
        }
        Ok(())
    }

    /// Stop background jobs and give pending cache writes up to
    /// `shutdown.grace` to finish.
    pub async fn shutdown(&self) -> DrainOutcome {
        tracing::info!(
            grace_ms = self.config.shutdown.grace.as_millis() as u64,
            pending_cache_writes = self.cache.pending_writes(),
            "Shutting down"
        );
        let outcome = self.tasks.drain(self.config.shutdown.grace).await;
        tracing::info!(
            completed = outcome.completed,
            abandoned = outcome.abandoned,
            "Shutdown complete"
        );
        outcome
    }

    /// Reclaim expired entries of the in-memory store every
    /// `redis.memory_sweep_interval_ms`.
    fn spawn_store_sweep(&self) {
        let store = Arc::clone(&self.store);
        let shutdown = self.tasks.cancellation_token();
        let interval = Duration::from_millis(self.config.redis.memory_sweep_interval_ms);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Store expiry sweep started");

        self.tasks.spawn("store-sweep", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Expired store entries reclaimed");
                        }
                    }
                }
            }
        });
    }

    /// Raise an alert when a breaker opens and when it recovers.
    fn spawn_breaker_alerts(&self) {
        let mut events = self.breakers.subscribe();
        let shutdown = self.tasks.cancellation_token();
        self.tasks.spawn("breaker-alerts", async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) if event.to == CircuitState::Open => {
                        tracing::error!(
                            breaker = event.kind.breaker_name(),
                            from = %event.from,
                            at = %event.at,
                            "ALERT: inference dependency failing, breaker opened"
                        );
                    }
                    Ok(event) if event.to == CircuitState::Closed => {
                        tracing::info!(
                            breaker = event.kind.breaker_name(),
                            at = %event.at,
                            "Inference dependency recovered"
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Breaker alert listener lagged");
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("store", &self.store.backend())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
