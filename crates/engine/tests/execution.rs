//! Execution loop behaviour against scripted collaborators.

mod common;

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use qarun_core::error::CoreError;
use qarun_core::run::NewRun;
use qarun_core::status::{RunStatus, TestStatus};
use qarun_db::RunArchive;

use common::{
    events_until, FakeCatalog, FakePool, Harness, ScriptedExecutor, Step, ORG, PROJECT, SUITE,
};

#[tokio::test]
async fn all_tests_pass() {
    let h = Harness::new(FakeCatalog::suite(3, 0), FakePool::new(), ScriptedExecutor::new());
    let run = h.queue_run().await;
    let mut sub = h.subscribe(run.id);

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Passed);
    assert_eq!(done.total_tests, Some(3));
    assert_eq!(done.results.len(), 3);
    assert_eq!(
        done.results.iter().map(|r| r.test_id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.duration_ms.is_some());
    assert!(done.error.is_none());

    let events = events_until(&mut sub, "run-complete").await;
    assert_eq!(
        events,
        vec!["run-start", "run-progress", "run-progress", "run-progress", "run-complete"]
    );

    let mut webhooks = h.webhook_events().await;
    webhooks.sort();
    assert_eq!(webhooks, vec!["run.completed", "run.passed", "run.started"]);
}

#[tokio::test]
async fn loop_releases_resource_and_leaves_registry() {
    let h = Harness::new(FakeCatalog::suite(2, 0), FakePool::new(), ScriptedExecutor::new());
    let run = h.queue_run().await;

    h.engine.execute(run.id).await.unwrap();

    assert_eq!(h.pool.acquired(), 1);
    assert_eq!(h.pool.released(), vec!["session-1"]);
    assert!(!h.engine.registry().contains(run.id).await);
    assert_eq!(h.engine.registry().in_flight().await, 0);
}

#[tokio::test]
async fn flaky_test_passes_on_retry() {
    let executor = ScriptedExecutor::new().script(2, [Step::Fail, Step::Pass]);
    let h = Harness::new(FakeCatalog::suite(3, 1), FakePool::new(), executor);
    let run = h.queue_run().await;
    let mut sub = h.subscribe(run.id);

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Passed);
    assert_eq!(done.results.len(), 3);
    let flaky = &done.results[1];
    assert_eq!(flaky.status, TestStatus::Passed);
    assert_eq!(flaky.retry_count, 1);
    assert!(flaky.passed_on_retry);
    assert!(!done.results[0].passed_on_retry);
    assert_eq!(h.executor.calls_for(2), 2);

    let events = events_until(&mut sub, "run-complete").await;
    assert_eq!(events.iter().filter(|e| *e == "test-retry").count(), 1);
}

#[tokio::test]
async fn retries_are_bounded_by_suite_budget() {
    let executor =
        ScriptedExecutor::new().script(1, [Step::Fail, Step::Fail, Step::Fail, Step::Fail]);
    let h = Harness::new(FakeCatalog::suite(2, 2), FakePool::new(), executor);
    let run = h.queue_run().await;

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(h.executor.calls_for(1), 3);
    assert_eq!(done.results[0].status, TestStatus::Failed);
    assert_eq!(done.results[0].retry_count, 2);
    assert!(!done.results[0].passed_on_retry);
    // Later tests still run.
    assert_eq!(done.results[1].status, TestStatus::Passed);

    let webhooks = h.webhook_events().await;
    assert!(webhooks.contains(&"run.failed".to_string()));
    assert!(!webhooks.contains(&"run.passed".to_string()));
}

#[tokio::test]
async fn executor_crash_is_recorded_as_test_error() {
    let executor = ScriptedExecutor::new()
        .script(1, [Step::Fail])
        .script(2, [Step::Crash]);
    let h = Harness::new(FakeCatalog::suite(3, 0), FakePool::new(), executor);
    let run = h.queue_run().await;

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Error);
    assert_eq!(done.results.len(), 3);
    assert_eq!(done.results[1].status, TestStatus::Error);
    assert!(done.results[1].error.as_deref().unwrap().contains("runner crashed"));
    // A per-test failure is not a run-level error.
    assert!(done.error.is_none());
}

#[tokio::test]
async fn acquisition_failure_finalizes_as_error() {
    let h = Harness::new(FakeCatalog::suite(3, 0), FakePool::unavailable(), ScriptedExecutor::new());
    let run = h.queue_run().await;
    let mut sub = h.subscribe(run.id);

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Error);
    assert!(done.results.is_empty());
    assert!(done.completed_at.is_some());
    let message = done.error.unwrap();
    assert!(message.contains("chromium"), "{message}");
    assert!(message.contains("no browsers left"), "{message}");

    assert!(h.executor.calls().is_empty());
    assert!(h.pool.released().is_empty());
    assert!(!h.engine.registry().contains(run.id).await);

    let events = events_until(&mut sub, "run-complete").await;
    assert_eq!(events, vec!["run-start", "run-complete"]);
}

#[tokio::test]
async fn missing_suite_finalizes_as_error_without_acquiring() {
    let mut catalog = FakeCatalog::suite(3, 0);
    catalog.suite = None;
    let h = Harness::new(catalog, FakePool::new(), ScriptedExecutor::new());
    let run = h.queue_run().await;

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Error);
    assert_eq!(done.error.as_deref(), Some("Infrastructure failure: Suite 30 not found"));
    assert_eq!(h.pool.acquired(), 0);
}

#[tokio::test]
async fn single_test_run_executes_only_that_test() {
    let h = Harness::new(FakeCatalog::suite(3, 0), FakePool::new(), ScriptedExecutor::new());
    let run = h
        .queue(NewRun {
            org_id: ORG,
            project_id: PROJECT,
            suite_id: SUITE,
            test_id: Some(2),
            ..Default::default()
        })
        .await;

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.total_tests, Some(1));
    assert_eq!(done.results.len(), 1);
    assert_eq!(done.results[0].test_id, 2);
}

#[tokio::test]
async fn run_overrides_win_over_project_variables() {
    let catalog = FakeCatalog::suite(1, 0)
        .with_variables(&[("BASE_URL", "https://staging"), ("LOCALE", "en")]);
    let h = Harness::new(catalog, FakePool::new(), ScriptedExecutor::new());
    let run = h
        .queue(NewRun {
            org_id: ORG,
            project_id: PROJECT,
            suite_id: SUITE,
            env_overrides: BTreeMap::from([("BASE_URL".to_string(), "https://preview".to_string())]),
            ..Default::default()
        })
        .await;

    h.engine.execute(run.id).await.unwrap();

    let env = &h.executor.envs()[0];
    assert_eq!(env["BASE_URL"], "https://preview");
    assert_eq!(env["LOCALE"], "en");
}

#[tokio::test]
async fn second_loop_for_same_run_is_rejected() {
    let h = Harness::new(FakeCatalog::suite(1, 0), FakePool::new(), ScriptedExecutor::new());
    let run = h.queue_run().await;
    h.engine.registry().register(run.id).await.unwrap();

    let err = h.engine.execute(run.id).await.unwrap_err();

    assert_matches!(err, CoreError::Conflict(_));
    assert_eq!(h.status(run.id).await, RunStatus::Pending);
}

#[tokio::test]
async fn finished_run_cannot_be_executed_again() {
    let h = Harness::new(FakeCatalog::suite(1, 0), FakePool::new(), ScriptedExecutor::new());
    let run = h.queue_run().await;
    let first = h.engine.execute(run.id).await.unwrap();

    let err = h.engine.execute(run.id).await.unwrap_err();

    assert_matches!(
        err,
        CoreError::InvalidTransition { action: "start", status: RunStatus::Passed }
    );
    assert!(!h.engine.registry().contains(run.id).await);
    let again = h.engine.get_run(ORG, run.id).await.unwrap();
    assert_eq!(again.completed_at, first.completed_at);
    assert_eq!(h.executor.calls().len(), 1);
}

#[tokio::test]
async fn final_state_reaches_the_archive() {
    let h = Harness::new(FakeCatalog::suite(2, 0), FakePool::new(), ScriptedExecutor::new());
    let run = h.queue_run().await;

    h.engine.execute(run.id).await.unwrap();
    h.engine.store().flush().await;

    let archived = h.archive.load(run.id).await.unwrap().unwrap();
    assert_eq!(archived.status, RunStatus::Passed);
    assert_eq!(archived.results.len(), 2);
}

#[tokio::test]
async fn progress_reports_counts() {
    let executor = ScriptedExecutor::new().script(3, [Step::Fail]);
    let h = Harness::new(FakeCatalog::suite(3, 0), FakePool::new(), executor);
    let run = h.queue_run().await;

    h.engine.execute(run.id).await.unwrap();
    let progress = h.engine.get_progress(ORG, run.id).await.unwrap();

    assert_eq!(progress.completed, 3);
    assert_eq!(progress.total, Some(3));
    assert_eq!(progress.passed, 2);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.last_test_name.as_deref(), Some("test-3"));
    assert_eq!(progress.last_test_status, Some(TestStatus::Failed));
}

#[tokio::test]
async fn suite_retry_budget_is_not_capped() {
    let executor = ScriptedExecutor::new().script(1, vec![Step::Fail; 10]);
    let h = Harness::new(FakeCatalog::suite(1, 7), FakePool::new(), executor);
    let run = h.queue_run().await;

    let done = h.engine.execute(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(h.executor.calls_for(1), 8);
    assert_eq!(done.results[0].retry_count, 7);
}

#[tokio::test]
async fn panicking_collaborator_finalizes_run_as_error() {
    let executor = ScriptedExecutor::new().script(2, [Step::Panic]);
    let h = Harness::new(FakeCatalog::suite(3, 0), FakePool::new(), executor);
    let run = h.queue_run().await;

    let task = h.engine.spawn(run.id).await.unwrap();
    let done = task.await.unwrap().unwrap();

    assert_eq!(done.status, RunStatus::Error);
    assert!(done.completed_at.is_some());
    assert!(done.error.as_deref().unwrap().contains("browser driver exploded"));
    assert_eq!(done.results.len(), 1);
    assert_eq!(h.status(run.id).await, RunStatus::Error);

    assert!(!h.engine.registry().contains(run.id).await);
    assert_eq!(h.engine.registry().in_flight().await, 0);
    assert_eq!(h.pool.released(), vec!["session-1"]);

    let webhooks = h.webhook_events().await;
    assert!(webhooks.contains(&"run.completed".to_string()));
    assert!(webhooks.contains(&"run.failed".to_string()));
}

#[tokio::test]
async fn scheduled_run_triggers_schedule_webhook() {
    let h = Harness::new(FakeCatalog::suite(1, 0), FakePool::new(), ScriptedExecutor::new());

    h.queue(NewRun {
        org_id: ORG,
        project_id: PROJECT,
        suite_id: SUITE,
        schedule_id: Some(5),
        ..Default::default()
    })
    .await;
    assert_eq!(h.webhook_events().await, vec!["schedule.triggered"]);

    // Manually queued runs do not.
    h.queue_run().await;
    assert!(h.webhook_events().await.is_empty());
}
