//! Background run dispatcher.
//!
//! Polls the pending queue every `poll_interval` and starts an execution
//! loop for each run that fits under `max_concurrent_runs`. Runs are taken
//! in queue order: priority, then creation time.

use std::sync::Arc;
use std::time::Duration;

use qarun_core::error::CoreError;
use tokio_util::sync::CancellationToken;

use crate::engine::RunEngine;

/// A single long-lived task feeding the engine.
pub struct RunDispatcher {
    engine: Arc<RunEngine>,
    poll_interval: Duration,
    max_concurrent_runs: usize,
    prune_interval: Duration,
    terminal_retention: Duration,
}

impl RunDispatcher {
    /// Create a dispatcher using the engine's configured limits.
    pub fn new(engine: Arc<RunEngine>) -> Self {
        let config = engine.config().clone();
        Self {
            engine,
            poll_interval: config.poll_interval,
            max_concurrent_runs: config.max_concurrent_runs.max(1),
            prune_interval: config.prune_interval,
            terminal_retention: config.terminal_retention,
        }
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    ///
    /// Loops already started keep running; callers wanting a drain wait on
    /// the registry afterwards.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut prune_ticker = tokio::time::interval(self.prune_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_concurrent_runs = self.max_concurrent_runs,
            "Run dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Run dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let started = self.try_dispatch().await;
                    if started > 0 {
                        tracing::debug!(started, "Dispatch cycle started runs");
                    }
                }
                _ = prune_ticker.tick() => {
                    self.prune().await;
                }
            }
        }
    }

    /// One dispatch cycle. Returns the number of loops started.
    pub async fn try_dispatch(&self) -> usize {
        let in_flight = self.engine.registry().in_flight().await;
        let free = self.max_concurrent_runs.saturating_sub(in_flight);
        if free == 0 {
            return 0;
        }

        // Runs registered but not yet marked running still look pending.
        let mut started = 0;
        for run in self.engine.next_pending(free + in_flight).await {
            if started == free {
                break;
            }
            if self.engine.registry().contains(run.id).await {
                continue;
            }
            match self.engine.spawn(run.id).await {
                Ok(_) => {
                    tracing::info!(
                        run_id = %run.id,
                        org_id = run.org_id,
                        priority = run.priority,
                        "Run dispatched",
                    );
                    started += 1;
                }
                Err(CoreError::Conflict(_)) => {
                    tracing::debug!(run_id = %run.id, "Run already executing, skipped");
                }
                Err(e) => {
                    tracing::error!(run_id = %run.id, error = %e, "Failed to dispatch run");
                }
            }
        }
        started
    }

    async fn prune(&self) {
        let retention = chrono::Duration::from_std(self.terminal_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let evicted = self.engine.store().prune_terminal(retention).await;
        if evicted > 0 {
            tracing::info!(evicted, "Evicted finished runs from memory");
        }
    }
}
