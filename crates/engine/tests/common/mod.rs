#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use qarun_core::run::{BrowserKind, NewRun, SuiteInfo, TestDefinition, TestRun, TestRunResult};
use qarun_core::status::{RunStatus, TestStatus};
use qarun_core::types::{DbId, RunId};
use qarun_db::{MemoryRunArchive, RunStore};
use qarun_engine::{Collaborators, EngineConfig, RunEngine};
use qarun_events::{
    ChannelSubscription, EventBus, LifecycleNotifier, WebhookDispatcher, WebhookError,
    WebhookPayload,
};
use qarun_runner::{
    AutomationHandle, AutomationPool, ExecutionContext, RunnerError, TestCatalog, TestExecutor,
};
use tokio::sync::mpsc;

pub const ORG: DbId = 10;
pub const PROJECT: DbId = 20;
pub const SUITE: DbId = 30;

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// What one executor call does.
#[derive(Debug, Clone)]
pub enum Step {
    Pass,
    Fail,
    /// Infrastructure failure (`Err`).
    Crash,
    /// Sleep without observing cancellation, then pass.
    Hang(Duration),
    /// Block until the run is cancelled, then fail like a torn-down browser.
    BlockUntilCancelled,
    /// Block until the run is cancelled, then report an ordinary test failure.
    FailWhenCancelled,
    /// The collaborator panics.
    Panic,
}

/// Executor replaying a per-test script; unscripted calls pass.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<DbId, VecDeque<Step>>>,
    delay: Duration,
    calls: Mutex<Vec<(RunId, DbId)>>,
    envs: Mutex<Vec<BTreeMap<String, String>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes at least `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn script(self, test_id: DbId, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(test_id, steps.into_iter().collect());
        self
    }

    pub fn calls(&self) -> Vec<(RunId, DbId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, test_id: DbId) -> usize {
        self.calls().iter().filter(|(_, t)| *t == test_id).count()
    }

    pub fn envs(&self) -> Vec<BTreeMap<String, String>> {
        self.envs.lock().unwrap().clone()
    }

    /// Highest number of overlapping calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, test_id: DbId) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&test_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Pass)
    }
}

fn result(test: &TestDefinition, status: TestStatus) -> TestRunResult {
    TestRunResult {
        test_id: test.id,
        test_name: test.name.clone(),
        status,
        duration_ms: 5,
        retry_count: 0,
        passed_on_retry: false,
        error: (status != TestStatus::Passed).then(|| "assertion failed".to_string()),
        steps: serde_json::Value::Null,
    }
}

#[async_trait]
impl TestExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        test: &TestDefinition,
        _handle: &AutomationHandle,
        ctx: &ExecutionContext,
    ) -> Result<TestRunResult, RunnerError> {
        self.calls.lock().unwrap().push((ctx.run_id, test.id));
        self.envs.lock().unwrap().push(ctx.env.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = match self.next_step(test.id) {
            Step::Pass => Ok(result(test, TestStatus::Passed)),
            Step::Fail => Ok(result(test, TestStatus::Failed)),
            Step::Crash => Err(RunnerError::Api {
                status: 502,
                body: "runner crashed".into(),
            }),
            Step::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(result(test, TestStatus::Passed))
            }
            Step::BlockUntilCancelled => {
                ctx.signals.cancelled().await;
                Err(RunnerError::Aborted("session closed".into()))
            }
            Step::FailWhenCancelled => {
                ctx.signals.cancelled().await;
                Ok(result(test, TestStatus::Failed))
            }
            Step::Panic => panic!("browser driver exploded"),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePool {
    unavailable: bool,
    acquired: AtomicUsize,
    released: Mutex<Vec<String>>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutomationPool for FakePool {
    async fn acquire(&self, browser: BrowserKind) -> Result<AutomationHandle, RunnerError> {
        if self.unavailable {
            return Err(RunnerError::Unavailable {
                browser,
                reason: "no browsers left".into(),
            });
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AutomationHandle {
            id: format!("session-{n}"),
            browser,
            acquired_at: Utc::now(),
        })
    }

    async fn release(&self, handle: &AutomationHandle) -> Result<(), RunnerError> {
        self.released.lock().unwrap().push(handle.id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub struct FakeCatalog {
    pub suite: Option<SuiteInfo>,
    pub tests: Vec<TestDefinition>,
    pub variables: HashMap<String, String>,
}

impl FakeCatalog {
    /// A suite of `count` tests with ids `1..=count`.
    pub fn suite(count: i64, max_retries: u32) -> Self {
        Self {
            suite: Some(SuiteInfo {
                id: SUITE,
                name: "checkout".into(),
                project_id: PROJECT,
                max_retries,
            }),
            tests: (1..=count)
                .map(|id| TestDefinition {
                    id,
                    name: format!("test-{id}"),
                    suite_id: SUITE,
                    steps: serde_json::json!([]),
                })
                .collect(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variables(mut self, vars: &[(&str, &str)]) -> Self {
        self.variables = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }
}

#[async_trait]
impl TestCatalog for FakeCatalog {
    async fn suite(&self, suite_id: DbId) -> Result<Option<SuiteInfo>, RunnerError> {
        Ok(self.suite.clone().filter(|s| s.id == suite_id))
    }

    async fn suite_tests(&self, _suite_id: DbId) -> Result<Vec<TestDefinition>, RunnerError> {
        Ok(self.tests.clone())
    }

    async fn single_test(&self, test_id: DbId) -> Result<Option<TestDefinition>, RunnerError> {
        Ok(self.tests.iter().find(|t| t.id == test_id).cloned())
    }

    async fn project_variables(
        &self,
        _project_id: DbId,
    ) -> Result<HashMap<String, String>, RunnerError> {
        Ok(self.variables.clone())
    }
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

pub struct RecordingDispatcher {
    tx: mpsc::UnboundedSender<WebhookPayload>,
}

#[async_trait]
impl WebhookDispatcher for RecordingDispatcher {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let _ = self.tx.send(payload.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Arc<RunEngine>,
    pub archive: Arc<MemoryRunArchive>,
    pub executor: Arc<ScriptedExecutor>,
    pub pool: Arc<FakePool>,
    webhooks: tokio::sync::Mutex<mpsc::UnboundedReceiver<WebhookPayload>>,
}

impl Harness {
    pub fn new(catalog: FakeCatalog, pool: FakePool, executor: ScriptedExecutor) -> Self {
        Self::with_config(catalog, pool, executor, test_config())
    }

    pub fn with_config(
        catalog: FakeCatalog,
        pool: FakePool,
        executor: ScriptedExecutor,
        config: EngineConfig,
    ) -> Self {
        let archive = Arc::new(MemoryRunArchive::new());
        let store = Arc::new(RunStore::with_retry_delays(
            archive.clone(),
            vec![Duration::from_millis(1)],
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = LifecycleNotifier::new(
            Arc::new(EventBus::default()),
            Arc::new(RecordingDispatcher { tx }),
        );

        let executor = Arc::new(executor);
        let pool = Arc::new(pool);
        let collaborators = Collaborators {
            pool: pool.clone(),
            executor: executor.clone(),
            catalog: Arc::new(catalog),
        };

        Self {
            engine: Arc::new(RunEngine::new(store, notifier, collaborators, config)),
            archive,
            executor,
            pool,
            webhooks: tokio::sync::Mutex::new(rx),
        }
    }

    /// Queue a suite run for the test organization.
    pub async fn queue_run(&self) -> TestRun {
        self.queue(NewRun {
            org_id: ORG,
            project_id: PROJECT,
            suite_id: SUITE,
            ..Default::default()
        })
        .await
    }

    pub async fn queue(&self, input: NewRun) -> TestRun {
        self.engine.start_run(input).await.unwrap()
    }

    pub fn subscribe(&self, run_id: RunId) -> ChannelSubscription {
        self.engine
            .notifier()
            .bus()
            .subscribe_channel(qarun_core::lifecycle::Channel::Run(run_id))
    }

    /// Webhook event names received so far, waiting briefly for stragglers.
    pub async fn webhook_events(&self) -> Vec<String> {
        let mut rx = self.webhooks.lock().await;
        let mut names = Vec::new();
        while let Ok(Some(payload)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            names.push(payload.event.to_string());
        }
        names
    }

    pub async fn status(&self, run_id: RunId) -> RunStatus {
        self.engine.get_status(ORG, run_id).await.unwrap()
    }

    /// Poll until the run reaches `status`.
    pub async fn wait_for_status(&self, run_id: RunId, status: RunStatus) -> TestRun {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let run = self.engine.get_run(ORG, run_id).await.unwrap();
                if run.status == status {
                    return run;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("run {run_id} never reached {status}"))
    }
}

/// Fast, short-grace config for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        cancel_grace: Duration::from_secs(2),
        max_concurrent_runs: 4,
        poll_interval: Duration::from_millis(10),
        terminal_retention: Duration::from_secs(3_600),
        prune_interval: Duration::from_secs(3_600),
    }
}

/// Collect event names from a subscription until `last` is seen.
pub async fn events_until(sub: &mut ChannelSubscription, last: &str) -> Vec<String> {
    let collected = tokio::time::timeout(Duration::from_secs(5), async {
        let mut names = Vec::new();
        while let Some(event) = sub.recv().await {
            let done = event.event == last;
            names.push(event.event);
            if done {
                break;
            }
        }
        names
    })
    .await;
    collected.unwrap_or_else(|_| panic!("never saw {last}"))
}
