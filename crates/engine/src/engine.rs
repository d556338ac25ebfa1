//! The run service facade.

use std::sync::Arc;

use chrono::Utc;
use qarun_core::error::CoreError;
use qarun_core::lifecycle::WebhookEvent;
use qarun_core::run::{NewRun, RunProgress, TestRun, TestRunResult};
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId};
use qarun_db::RunStore;
use qarun_events::LifecycleNotifier;
use qarun_runner::{AutomationPool, RunnerClient, TestCatalog, TestExecutor};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::registry::ResourceRegistry;

/// The external services an execution loop drives.
#[derive(Clone)]
pub struct Collaborators {
    pub pool: Arc<dyn AutomationPool>,
    pub executor: Arc<dyn TestExecutor>,
    pub catalog: Arc<dyn TestCatalog>,
}

impl Collaborators {
    /// Use one runner service for sessions, execution and catalog lookups.
    pub fn from_runner(client: Arc<RunnerClient>) -> Self {
        Self {
            pool: client.clone(),
            executor: client.clone(),
            catalog: client,
        }
    }
}

/// Owns the run store, the resource registry and the collaborators.
///
/// Execution lives in [`crate::execution`], control operations in
/// [`crate::control`] and queue views in [`crate::queue`].
pub struct RunEngine {
    pub(crate) store: Arc<RunStore>,
    pub(crate) registry: Arc<ResourceRegistry>,
    pub(crate) notifier: LifecycleNotifier,
    pub(crate) collaborators: Collaborators,
    pub(crate) config: EngineConfig,
}

impl RunEngine {
    pub fn new(
        store: Arc<RunStore>,
        notifier: LifecycleNotifier,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(ResourceRegistry::new()),
            notifier,
            collaborators,
            config,
        }
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> &LifecycleNotifier {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a `pending` run. The dispatcher picks it up in queue order.
    ///
    /// Runs created by a schedule also trigger the `schedule.triggered`
    /// webhook.
    pub async fn start_run(&self, input: NewRun) -> Result<TestRun, CoreError> {
        let run = TestRun::new(input, Utc::now())?;
        let run = self.store.create(run).await?;
        tracing::info!(
            run_id = %run.id,
            org_id = run.org_id,
            priority = run.priority,
            "Run queued",
        );
        if run.schedule_id.is_some() {
            self.notifier
                .dispatch_webhook(WebhookEvent::ScheduleTriggered, &run, None);
        }
        Ok(run)
    }

    /// Fetch a run visible to `org_id`. Runs of other organizations are
    /// reported as not found.
    pub async fn get_run(&self, org_id: DbId, run_id: RunId) -> Result<TestRun, CoreError> {
        self.store
            .get(run_id)
            .await
            .filter(|run| run.org_id == org_id)
            .ok_or_else(|| CoreError::run_not_found(run_id))
    }

    pub async fn get_status(&self, org_id: DbId, run_id: RunId) -> Result<RunStatus, CoreError> {
        Ok(self.get_run(org_id, run_id).await?.status)
    }

    pub async fn get_progress(
        &self,
        org_id: DbId,
        run_id: RunId,
    ) -> Result<RunProgress, CoreError> {
        Ok(self.get_run(org_id, run_id).await?.progress())
    }

    pub async fn get_results(
        &self,
        org_id: DbId,
        run_id: RunId,
    ) -> Result<Vec<TestRunResult>, CoreError> {
        Ok(self.get_run(org_id, run_id).await?.results)
    }

    /// Register the run and execute it on a detached task.
    ///
    /// Registration happens before this returns, so a second `spawn` for
    /// the same run fails with `Conflict` instead of racing the first.
    pub async fn spawn(
        self: &Arc<Self>,
        run_id: RunId,
    ) -> Result<JoinHandle<Result<TestRun, CoreError>>, CoreError> {
        let signals = self.registry.register(run_id).await?;
        let engine = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let result = engine.run_supervised(run_id, signals).await;
            if let Err(e) = &result {
                tracing::error!(run_id = %run_id, error = %e, "Execution loop ended with error");
            }
            result
        }))
    }

    /// Execute a run inline, returning its final record.
    pub async fn execute(&self, run_id: RunId) -> Result<TestRun, CoreError> {
        let signals = self.registry.register(run_id).await?;
        self.run_supervised(run_id, signals).await
    }
}
