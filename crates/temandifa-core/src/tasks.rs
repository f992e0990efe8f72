//! Tracked background work.
//!
//! `BackgroundTasks` is the single registry for work that runs off the request
//! path: asynchronous cache population and periodic sweeps. The shutdown
//! sequence calls [`BackgroundTasks::drain`] to give outstanding tasks a
//! bounded grace period before the store connection is closed.
//!
//! Tasks spawned here are not tied to the cancellation of whoever spawned
//! them. Long-running loops should watch [`BackgroundTasks::cancellation_token`]
//! and exit when it fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Result of draining the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// `true` if every task finished within the grace period.
    pub completed: bool,
    /// Tasks still running when the grace period ran out.
    pub abandoned: usize,
}

/// Registry of background tasks with cooperative shutdown.
///
/// Cheap to clone; clones share the same tracker.
#[derive(Clone, Debug, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning background task");
        self.tracker
            .spawn(future.instrument(tracing::debug_span!("background", task = name)));
    }

    /// Token cancelled when [`drain`](Self::drain) starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// `true` once draining has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Signal shutdown and wait up to `grace` for outstanding tasks.
    ///
    /// Tasks still running afterwards are abandoned, not retried.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.shutdown.cancel();
        self.tracker.close();

        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, grace_ms = grace.as_millis() as u64, "draining background tasks");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => DrainOutcome {
                completed: true,
                abandoned: 0,
            },
            Err(_) => {
                let abandoned = self.tracker.len();
                tracing::warn!(abandoned, "background tasks exceeded shutdown grace period");
                DrainOutcome {
                    completed: false,
                    abandoned,
                }
            }
        }
    }
}
