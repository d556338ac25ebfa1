//! Collaborator contracts consumed by the execution engine.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use qarun_core::run::{BrowserKind, SuiteInfo, TestDefinition, TestRunResult};
use qarun_core::types::{DbId, RunId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::signals::RunSignals;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors from the runner boundary. Ordinary test failures are never
/// errors; they come back as a [`TestRunResult`] with a failing status.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The runner service returned a non-2xx status code.
    #[error("Runner API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// No automation resource could be obtained.
    #[error("No {browser} resource available: {reason}")]
    Unavailable {
        browser: BrowserKind,
        reason: String,
    },

    /// The in-flight call was abandoned because the run was cancelled or
    /// its resource was torn down.
    #[error("Execution aborted: {0}")]
    Aborted(String),
}

// ---------------------------------------------------------------------------
// Handle and context
// ---------------------------------------------------------------------------

/// Opaque reference to a live automation resource (a browser session).
///
/// Cloning the handle does not duplicate the resource; only the execution
/// loop that acquired it uses it for work, while the control surface may
/// pass a clone to [`AutomationPool::release`] to tear it down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationHandle {
    pub id: String,
    pub browser: BrowserKind,
    pub acquired_at: Timestamp,
}

/// Everything an executor needs besides the test and the handle.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub org_id: DbId,
    pub env: BTreeMap<String, String>,
    /// Cancel and pause flags. Executors that run steps locally should
    /// call [`RunSignals::wait_while_paused`] between steps.
    pub signals: RunSignals,
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// `acquireAutomationResource` / `release`.
#[async_trait]
pub trait AutomationPool: Send + Sync {
    async fn acquire(&self, browser: BrowserKind) -> Result<AutomationHandle, RunnerError>;

    /// Tear down a resource. Must tolerate being called more than once for
    /// the same handle.
    async fn release(&self, handle: &AutomationHandle) -> Result<(), RunnerError>;
}

/// `executeSingleTest`.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run one test to completion. Returns `Err` only for infrastructure
    /// failure.
    async fn execute(
        &self,
        test: &TestDefinition,
        handle: &AutomationHandle,
        ctx: &ExecutionContext,
    ) -> Result<TestRunResult, RunnerError>;
}

/// `resolveSuiteTests` / `resolveSingleTest` / project variables.
#[async_trait]
pub trait TestCatalog: Send + Sync {
    async fn suite(&self, suite_id: DbId) -> Result<Option<SuiteInfo>, RunnerError>;

    /// Tests of a suite, in execution order.
    async fn suite_tests(&self, suite_id: DbId) -> Result<Vec<TestDefinition>, RunnerError>;

    async fn single_test(&self, test_id: DbId) -> Result<Option<TestDefinition>, RunnerError>;

    async fn project_variables(
        &self,
        project_id: DbId,
    ) -> Result<HashMap<String, String>, RunnerError>;
}
