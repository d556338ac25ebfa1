//! The per-run execution loop.
//!
//! One loop drives one run: resolve the tests, acquire a browser, execute
//! each test in order with bounded retry, and finalize. Cancellation and
//! pause are observed cooperatively at test boundaries; an in-flight
//! executor call is aborted by the control surface tearing down the
//! resource. A panic inside the loop is caught and the run finalized as
//! `error`, so no run is ever left `running` with its resource held.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use qarun_core::environment::merge_environment;
use qarun_core::error::CoreError;
use qarun_core::lifecycle::{
    WebhookEvent, EVENT_RUN_COMPLETE, EVENT_RUN_PROGRESS, EVENT_RUN_START, EVENT_TEST_RETRY,
};
use qarun_core::retry::{finalize_attempts, RetryPolicy};
use qarun_core::run::{conclude, RunPatch, SuiteInfo, TestDefinition, TestRun, TestRunResult};
use qarun_core::status::RunStatus;
use qarun_core::types::RunId;
use qarun_runner::{AutomationHandle, ExecutionContext, RunSignals};
use serde_json::json;

use crate::engine::RunEngine;
use crate::error::ExecutionError;

/// Why the test loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Completed,
    Cancelled,
}

/// How a run is being finalized.
#[derive(Debug, Clone)]
pub(crate) struct Finalization {
    pub status: RunStatus,
    pub error: Option<String>,
    pub discard_results: bool,
}

impl RunEngine {
    /// Run the loop, turning a panic anywhere inside it into an `error`
    /// finalization with the registry entry removed and the resource released.
    pub(crate) async fn run_supervised(
        &self,
        run_id: RunId,
        signals: RunSignals,
    ) -> Result<TestRun, CoreError> {
        match AssertUnwindSafe(self.run_registered(run_id, signals))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(run_id = %run_id, panic = %message, "Execution loop panicked");
                self.recover_from_panic(run_id, message).await
            }
        }
    }

    async fn recover_from_panic(
        &self,
        run_id: RunId,
        message: String,
    ) -> Result<TestRun, CoreError> {
        let finalized = self
            .finalize(
                run_id,
                Finalization {
                    status: RunStatus::Error,
                    error: Some(format!("Execution loop panicked: {message}")),
                    discard_results: false,
                },
            )
            .await;

        if let Some(handle) = self.registry.remove(run_id).await {
            self.release(run_id, &handle).await;
        }

        let (run, won) = finalized?;
        if won {
            self.announce_completion(&run, None);
        }
        Ok(run)
    }

    /// Body of an execution loop whose registry entry already exists.
    pub(crate) async fn run_registered(
        &self,
        run_id: RunId,
        signals: RunSignals,
    ) -> Result<TestRun, CoreError> {
        let started = self
            .store
            .update_if(
                run_id,
                |run| match run.status {
                    RunStatus::Pending | RunStatus::Running => Ok(()),
                    status => Err(CoreError::InvalidTransition {
                        action: "start",
                        status,
                    }),
                },
                RunPatch::status(RunStatus::Running),
            )
            .await;

        let run = match started {
            Ok(run) => run,
            Err(e) => {
                self.registry.remove(run_id).await;
                return Err(e);
            }
        };

        tracing::info!(run_id = %run_id, org_id = run.org_id, "Run started");
        self.notifier.notify(
            run_id,
            run.org_id,
            EVENT_RUN_START,
            json!({ "status": run.status, "started_at": run.started_at }),
        );
        self.notifier
            .dispatch_webhook(WebhookEvent::RunStarted, &run, None);

        let mut suite = None;
        let finalization = match self.drive(&run, &signals, &mut suite).await {
            Ok((LoopExit::Cancelled, _)) => Finalization {
                status: RunStatus::Cancelled,
                error: None,
                discard_results: false,
            },
            Ok((LoopExit::Completed, results)) => Finalization {
                status: if signals.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    conclude(&results)
                },
                error: None,
                discard_results: false,
            },
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Run aborted");
                Finalization {
                    status: RunStatus::Error,
                    error: Some(e.to_string()),
                    discard_results: false,
                }
            }
        };

        let finalized = self.finalize(run_id, finalization).await;

        if let Some(handle) = self.registry.remove(run_id).await {
            self.release(run_id, &handle).await;
        }

        let (run, won) = finalized?;
        if won {
            self.announce_completion(&run, suite.as_ref());
        }
        Ok(run)
    }

    /// Resolve, acquire and execute. Returns the results this loop
    /// recorded alongside the exit reason.
    async fn drive(
        &self,
        run: &TestRun,
        signals: &RunSignals,
        suite_out: &mut Option<SuiteInfo>,
    ) -> Result<(LoopExit, Vec<TestRunResult>), ExecutionError> {
        let catalog = &self.collaborators.catalog;

        let suite = catalog.suite(run.suite_id).await?.ok_or_else(|| {
            ExecutionError::Infrastructure(format!("Suite {} not found", run.suite_id))
        })?;
        *suite_out = Some(suite.clone());

        let tests: Vec<TestDefinition> = match run.test_id {
            Some(test_id) => {
                let test = catalog.single_test(test_id).await?.ok_or_else(|| {
                    ExecutionError::Infrastructure(format!("Test {test_id} not found"))
                })?;
                vec![test]
            }
            None => catalog.suite_tests(run.suite_id).await?,
        };

        let variables = catalog.project_variables(run.project_id).await?;
        let env = merge_environment(variables, &run.env_overrides);

        self.store
            .update(
                run.id,
                RunPatch {
                    total_tests: Some(tests.len() as i32),
                    ..Default::default()
                },
            )
            .await;

        let handle = self
            .collaborators
            .pool
            .acquire(run.browser)
            .await
            .map_err(|source| ExecutionError::ResourceAcquisition {
                browser: run.browser,
                source,
            })?;
        self.registry.attach_handle(run.id, handle.clone()).await;
        tracing::debug!(
            run_id = %run.id,
            handle = %handle.id,
            tests = tests.len(),
            "Automation resource acquired",
        );

        let ctx = ExecutionContext {
            run_id: run.id,
            org_id: run.org_id,
            env,
            signals: signals.clone(),
        };
        let policy = RetryPolicy::new(suite.max_retries);
        let mut results = Vec::with_capacity(tests.len());

        for test in &tests {
            if self.should_stop(run.id, signals).await {
                return Ok((LoopExit::Cancelled, results));
            }
            if signals.is_paused() {
                tracing::debug!(run_id = %run.id, "Run paused at test boundary");
                if !signals.wait_while_paused().await || self.should_stop(run.id, signals).await {
                    return Ok((LoopExit::Cancelled, results));
                }
            }

            let (result, stop) = self.run_test(run, test, &handle, &ctx, &policy).await;
            if let Some(result) = result {
                self.record_result(run.id, result.clone()).await;
                results.push(result);
            }
            if stop {
                return Ok((LoopExit::Cancelled, results));
            }
        }

        Ok((LoopExit::Completed, results))
    }

    /// Execute one test with retries. Returns the final result (if one
    /// should be recorded) and whether the loop must stop for cancellation.
    async fn run_test(
        &self,
        run: &TestRun,
        test: &TestDefinition,
        handle: &AutomationHandle,
        ctx: &ExecutionContext,
        policy: &RetryPolicy,
    ) -> (Option<TestRunResult>, bool) {
        let mut retries_used = 0;

        loop {
            let attempt = match self.collaborators.executor.execute(test, handle, ctx).await {
                Ok(result) => result,
                Err(e) => {
                    if self.should_stop(run.id, &ctx.signals).await {
                        tracing::debug!(
                            run_id = %run.id,
                            test_id = test.id,
                            "Executor aborted by cancellation",
                        );
                        return (None, true);
                    }
                    tracing::warn!(
                        run_id = %run.id,
                        test_id = test.id,
                        error = %e,
                        "Test execution failed",
                    );
                    TestRunResult::infrastructure_error(test, e.to_string())
                }
            };

            if !policy.should_retry(attempt.status, retries_used) {
                return (Some(finalize_attempts(attempt, retries_used)), false);
            }

            // The failed attempt stands as the final result if the run is
            // being cancelled.
            if self.should_stop(run.id, &ctx.signals).await {
                return (Some(finalize_attempts(attempt, retries_used)), true);
            }

            retries_used += 1;
            tracing::info!(
                run_id = %run.id,
                test_id = test.id,
                attempt = retries_used + 1,
                "Retrying failed test",
            );
            self.notifier.notify(
                run.id,
                run.org_id,
                EVENT_TEST_RETRY,
                json!({
                    "test_id": test.id,
                    "test_name": test.name,
                    "previous_status": attempt.status,
                    "retry": retries_used,
                    "max_retries": policy.max_retries(),
                }),
            );
        }
    }

    /// Append a result if the run is still active and publish progress.
    async fn record_result(&self, run_id: RunId, result: TestRunResult) {
        let updated = self
            .store
            .update_if(
                run_id,
                |run| {
                    if run.status.is_active() {
                        Ok(())
                    } else {
                        Err(CoreError::InvalidTransition {
                            action: "record a result for",
                            status: run.status,
                        })
                    }
                },
                RunPatch::append(result),
            )
            .await;

        match updated {
            Ok(run) => {
                let progress = run.progress();
                self.notifier.notify(
                    run_id,
                    run.org_id,
                    EVENT_RUN_PROGRESS,
                    json!({
                        "completed": progress.completed,
                        "total": progress.total,
                        "last_test_name": progress.last_test_name,
                        "last_test_status": progress.last_test_status,
                    }),
                );
            }
            Err(e) => {
                tracing::debug!(run_id = %run_id, error = %e, "Result dropped");
            }
        }
    }

    /// Cancellation flag raised, or the record says the run is winding
    /// down (or already finished).
    async fn should_stop(&self, run_id: RunId, signals: &RunSignals) -> bool {
        if signals.is_cancelled() {
            return true;
        }
        match self.store.get(run_id).await {
            Some(run) => run.status == RunStatus::Cancelling || run.is_terminal(),
            None => true,
        }
    }

    /// Move the run into its terminal status. The first writer wins; the
    /// returned flag says whether this call made the transition.
    ///
    /// A non-cancel outcome on a run that is already `cancelling` is
    /// recorded as `cancelled`. `discard_results` is applied even when
    /// another writer finalized first.
    pub(crate) async fn finalize(
        &self,
        run_id: RunId,
        finalization: Finalization,
    ) -> Result<(TestRun, bool), CoreError> {
        let mut won = false;
        let run = self
            .store
            .modify(run_id, |run| {
                let mut patch = RunPatch::default();
                if !run.is_terminal() {
                    won = true;
                    let status = if run.status == RunStatus::Cancelling {
                        RunStatus::Cancelled
                    } else {
                        finalization.status
                    };
                    patch.status = Some(status);
                    if status == RunStatus::Error {
                        patch.error = finalization.error;
                    }
                }
                patch.clear_results = finalization.discard_results;
                Ok(patch)
            })
            .await?;

        if won {
            tracing::info!(
                run_id = %run_id,
                status = %run.status,
                duration_ms = run.duration_ms,
                results = run.results.len(),
                "Run finalized",
            );
        }
        Ok((run, won))
    }

    /// Best-effort teardown of an automation resource.
    pub(crate) async fn release(&self, run_id: RunId, handle: &AutomationHandle) {
        if let Err(e) = self.collaborators.pool.release(handle).await {
            tracing::warn!(
                run_id = %run_id,
                handle = %handle.id,
                error = %e,
                "Failed to release automation resource",
            );
        }
    }

    /// Notify `run-complete` and dispatch the terminal webhooks.
    pub(crate) fn announce_completion(&self, run: &TestRun, suite: Option<&SuiteInfo>) {
        let progress = run.progress();
        self.notifier.notify(
            run.id,
            run.org_id,
            EVENT_RUN_COMPLETE,
            json!({
                "status": run.status,
                "duration_ms": run.duration_ms,
                "completed": progress.completed,
                "total": progress.total,
                "passed": progress.passed,
                "failed": progress.failed,
                "error": run.error,
            }),
        );

        self.notifier
            .dispatch_webhook(WebhookEvent::RunCompleted, run, suite);
        match run.status {
            RunStatus::Passed => {
                self.notifier.dispatch_webhook(WebhookEvent::RunPassed, run, suite)
            }
            RunStatus::Failed | RunStatus::Error => {
                self.notifier.dispatch_webhook(WebhookEvent::RunFailed, run, suite)
            }
            _ => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
