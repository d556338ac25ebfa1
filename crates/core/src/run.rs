//! Test run records, per-test results and the atomic patch applied to them.
//!
//! [`TestRun`] is the single authoritative record for a run. Every mutation
//! goes through [`RunPatch::apply`], which enforces the record invariants:
//!
//! - `started_at` is stamped once, on the first transition into `running`.
//! - `completed_at` / `duration_ms` are stamped once, on entry into a
//!   terminal status.
//! - A terminal status is sticky; later status writes are no-ops.
//! - `results` never grows past `total_tests`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::priority::DEFAULT_PRIORITY;
use crate::status::{RunStatus, TestStatus};
use crate::types::{DbId, RunId, Timestamp};

// ---------------------------------------------------------------------------
// BrowserKind
// ---------------------------------------------------------------------------

/// Browser engine requested for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(CoreError::Validation(format!(
                "Unknown browser kind '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog types
// ---------------------------------------------------------------------------

/// A test as handed to the single-test executor. `steps` is opaque here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: DbId,
    pub name: String,
    pub suite_id: DbId,
    #[serde(default)]
    pub steps: serde_json::Value,
}

/// Suite metadata the engine needs: owning project and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteInfo {
    pub id: DbId,
    pub name: String,
    pub project_id: DbId,
    #[serde(default)]
    pub max_retries: u32,
}

// ---------------------------------------------------------------------------
// TestRunResult
// ---------------------------------------------------------------------------

/// Outcome of one test within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub test_id: DbId,
    pub test_name: String,
    pub status: TestStatus,
    pub duration_ms: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub passed_on_retry: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: serde_json::Value,
}

impl TestRunResult {
    /// Result recorded when the executor itself failed for a test.
    pub fn infrastructure_error(test: &TestDefinition, message: impl Into<String>) -> Self {
        Self {
            test_id: test.id,
            test_name: test.name.clone(),
            status: TestStatus::Error,
            duration_ms: 0,
            retry_count: 0,
            passed_on_retry: false,
            error: Some(message.into()),
            steps: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// NewRun
// ---------------------------------------------------------------------------

/// Input for creating a run in `pending` status.
#[derive(Debug, Clone, Default, Validate)]
pub struct NewRun {
    pub org_id: DbId,
    pub project_id: DbId,
    pub suite_id: DbId,
    pub test_id: Option<DbId>,
    pub schedule_id: Option<DbId>,
    pub browser: BrowserKind,
    #[validate(length(min = 1, max = 255))]
    pub branch: Option<String>,
    pub env_overrides: BTreeMap<String, String>,
    #[validate(range(min = 1, max = 1000))]
    pub priority: Option<i32>,
}

// ---------------------------------------------------------------------------
// TestRun
// ---------------------------------------------------------------------------

/// One execution request for a suite or a single test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: RunId,
    pub org_id: DbId,
    pub project_id: DbId,
    pub suite_id: DbId,
    pub test_id: Option<DbId>,
    pub schedule_id: Option<DbId>,
    pub browser: BrowserKind,
    pub branch: Option<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub priority: i32,
    pub status: RunStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    /// Number of tests selected for the run, known once the test set is resolved.
    pub total_tests: Option<i32>,
    pub results: Vec<TestRunResult>,
    pub error: Option<String>,
}

impl TestRun {
    /// Build a new `pending` run, validating the request first.
    pub fn new(input: NewRun, now: Timestamp) -> Result<Self, CoreError> {
        input.validate()?;

        Ok(Self {
            id: uuid::Uuid::now_v7(),
            org_id: input.org_id,
            project_id: input.project_id,
            suite_id: input.suite_id,
            test_id: input.test_id,
            schedule_id: input.schedule_id,
            browser: input.browser,
            branch: input.branch,
            env_overrides: input.env_overrides,
            priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            total_tests: None,
            results: Vec::new(),
            error: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Snapshot of progress for dashboards and the progress endpoint.
    pub fn progress(&self) -> RunProgress {
        let count = |status: TestStatus| {
            self.results.iter().filter(|r| r.status == status).count()
        };
        let last = self.results.last();

        RunProgress {
            run_id: self.id,
            status: self.status,
            completed: self.results.len(),
            total: self.total_tests.map(|t| t.max(0) as usize),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            errored: count(TestStatus::Error),
            skipped: count(TestStatus::Skipped),
            last_test_name: last.map(|r| r.test_name.clone()),
            last_test_status: last.map(|r| r.status),
        }
    }
}

/// Derived progress view of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunProgress {
    pub run_id: RunId,
    pub status: RunStatus,
    pub completed: usize,
    pub total: Option<usize>,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub last_test_name: Option<String>,
    pub last_test_status: Option<TestStatus>,
}

/// Overall terminal status for a loop that was not cancelled.
///
/// `error` if any result errored, else `failed` if any failed, else `passed`.
pub fn conclude(results: &[TestRunResult]) -> RunStatus {
    if results.iter().any(|r| r.status == TestStatus::Error) {
        RunStatus::Error
    } else if results.iter().any(|r| r.status == TestStatus::Failed) {
        RunStatus::Failed
    } else {
        RunStatus::Passed
    }
}

// ---------------------------------------------------------------------------
// RunPatch
// ---------------------------------------------------------------------------

/// A partial update applied atomically to a single run.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub priority: Option<i32>,
    pub total_tests: Option<i32>,
    pub error: Option<String>,
    pub append_result: Option<TestRunResult>,
    /// Drop accumulated results. Also honoured on terminal runs.
    pub clear_results: bool,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_cleared_results(mut self) -> Self {
        self.clear_results = true;
        self
    }

    pub fn append(result: TestRunResult) -> Self {
        Self {
            append_result: Some(result),
            ..Default::default()
        }
    }

    /// Apply the patch in place. Returns `true` if the record changed.
    pub fn apply(&self, run: &mut TestRun, now: Timestamp) -> bool {
        let mut changed = false;

        if self.clear_results && !run.results.is_empty() {
            run.results.clear();
            changed = true;
        }

        // Terminal records only accept the result discard above.
        if run.status.is_terminal() {
            return changed;
        }

        if let Some(total) = self.total_tests {
            if run.total_tests != Some(total) {
                run.total_tests = Some(total);
                changed = true;
            }
        }

        if let Some(priority) = self.priority {
            if run.priority != priority {
                run.priority = priority;
                changed = true;
            }
        }

        if let Some(result) = &self.append_result {
            let within_budget = run
                .total_tests
                .map_or(true, |total| run.results.len() < total.max(0) as usize);
            if within_budget {
                run.results.push(result.clone());
                changed = true;
            }
        }

        if let Some(message) = &self.error {
            run.error = Some(message.clone());
            changed = true;
        }

        if let Some(status) = self.status {
            if status != run.status {
                run.status = status;
                changed = true;

                if status == RunStatus::Running && run.started_at.is_none() {
                    run.started_at = Some(now);
                }

                if status.is_terminal() {
                    let started = run.started_at.unwrap_or(run.created_at);
                    run.completed_at = Some(now);
                    run.duration_ms = Some((now - started).num_milliseconds().max(0));
                }
            }
        }

        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
