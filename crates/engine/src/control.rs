//! Control surface: cancel, pause, resume and prioritize.
//!
//! Every check-and-transition happens inside one [`RunStore::modify`]
//! call, so a control operation always acts on the latest record and
//! cannot interleave with the execution loop's own writes.
//!
//! [`RunStore::modify`]: qarun_db::RunStore::modify

use qarun_core::error::CoreError;
use qarun_core::lifecycle::{EVENT_RUN_CANCELLING, EVENT_RUN_PAUSED, EVENT_RUN_RESUMED};
use qarun_core::priority::validate_priority;
use qarun_core::run::{RunPatch, TestRun};
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::RunEngine;
use crate::execution::Finalization;

/// Options for [`RunEngine::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CancelOptions {
    /// Skip the grace period and finalize immediately.
    pub force: bool,
    /// Keep the results recorded before cancellation.
    pub save_partial_results: bool,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            force: false,
            save_partial_results: true,
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub run: TestRun,
    /// The run was already winding down and this (non-forced) request
    /// changed nothing.
    pub already_cancelling: bool,
}

/// Reject anything but `expected` for `action`, and foreign runs.
fn require(
    run: &TestRun,
    org_id: DbId,
    action: &'static str,
    expected: &[RunStatus],
) -> Result<(), CoreError> {
    if run.org_id != org_id {
        return Err(CoreError::run_not_found(run.id));
    }
    if expected.contains(&run.status) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            action,
            status: run.status,
        })
    }
}

impl RunEngine {
    /// Cancel a `running`, `paused` or `cancelling` run.
    ///
    /// The run moves to `cancelling`, the loop's cancellation flag is
    /// raised and its resource is torn down. Unless `force` is set the
    /// call then waits up to the configured grace period for the loop to
    /// finalize before finalizing the run as `cancelled` itself.
    pub async fn cancel(
        &self,
        org_id: DbId,
        run_id: RunId,
        options: CancelOptions,
    ) -> Result<CancelOutcome, CoreError> {
        let mut previous = RunStatus::Pending;
        let run = self
            .store
            .modify(run_id, |run| {
                require(
                    run,
                    org_id,
                    "cancel",
                    &[RunStatus::Running, RunStatus::Paused, RunStatus::Cancelling],
                )?;
                previous = run.status;
                Ok(RunPatch::status(RunStatus::Cancelling))
            })
            .await?;

        if previous == RunStatus::Cancelling && !options.force {
            tracing::debug!(run_id = %run_id, "Cancel already in progress");
            return Ok(CancelOutcome {
                run,
                already_cancelling: true,
            });
        }

        if previous != RunStatus::Cancelling {
            tracing::info!(run_id = %run_id, force = options.force, "Cancelling run");
            self.notifier.notify(
                run_id,
                run.org_id,
                EVENT_RUN_CANCELLING,
                json!({ "previous_status": previous, "force": options.force }),
            );
        }

        if let Some(handle) = self.registry.cancel(run_id).await {
            self.release(run_id, &handle).await;
        }

        if !options.force {
            let finished = self
                .registry
                .wait_finished(run_id, self.config.cancel_grace)
                .await;
            if !finished {
                tracing::warn!(
                    run_id = %run_id,
                    grace_ms = self.config.cancel_grace.as_millis() as u64,
                    "Run did not stop within grace period, finalizing",
                );
            }
        }

        let (run, won) = self
            .finalize(
                run_id,
                Finalization {
                    status: RunStatus::Cancelled,
                    error: None,
                    discard_results: !options.save_partial_results,
                },
            )
            .await?;
        if won {
            self.announce_completion(&run, None);
        }

        Ok(CancelOutcome {
            run,
            already_cancelling: false,
        })
    }

    /// Pause a `running` run at its next test boundary.
    pub async fn pause(&self, org_id: DbId, run_id: RunId) -> Result<TestRun, CoreError> {
        let run = self
            .store
            .update_if(
                run_id,
                |run| require(run, org_id, "pause", &[RunStatus::Running]),
                RunPatch::status(RunStatus::Paused),
            )
            .await?;

        self.registry.set_paused(run_id, true).await;
        tracing::info!(run_id = %run_id, "Run paused");
        self.notifier
            .notify(run_id, run.org_id, EVENT_RUN_PAUSED, json!({ "status": run.status }));
        Ok(run)
    }

    /// Resume a `paused` run.
    pub async fn resume(&self, org_id: DbId, run_id: RunId) -> Result<TestRun, CoreError> {
        let run = self
            .store
            .update_if(
                run_id,
                |run| require(run, org_id, "resume", &[RunStatus::Paused]),
                RunPatch::status(RunStatus::Running),
            )
            .await?;

        self.registry.set_paused(run_id, false).await;
        tracing::info!(run_id = %run_id, "Run resumed");
        self.notifier
            .notify(run_id, run.org_id, EVENT_RUN_RESUMED, json!({ "status": run.status }));
        Ok(run)
    }

    /// Change the priority of a `pending` run.
    pub async fn prioritize(
        &self,
        org_id: DbId,
        run_id: RunId,
        priority: i32,
    ) -> Result<TestRun, CoreError> {
        // Unknown or foreign runs are reported before the range check.
        let run = self
            .store
            .update_if(
                run_id,
                |run| {
                    require(run, org_id, "prioritize", &[RunStatus::Pending])?;
                    validate_priority(priority)
                },
                RunPatch {
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(run_id = %run_id, priority, "Run reprioritized");
        Ok(run)
    }
}
