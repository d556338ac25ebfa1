//! Row mapping for the `test_runs` table.

use std::collections::BTreeMap;

use qarun_core::error::CoreError;
use qarun_core::run::{TestRun, TestRunResult};
use qarun_core::types::{DbId, RunId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `test_runs` table.
#[derive(Debug, Clone, FromRow)]
pub struct TestRunRow {
    pub id: RunId,
    pub org_id: DbId,
    pub project_id: DbId,
    pub suite_id: DbId,
    pub test_id: Option<DbId>,
    pub schedule_id: Option<DbId>,
    pub browser: String,
    pub branch: Option<String>,
    pub env_overrides: Json<BTreeMap<String, String>>,
    pub priority: i32,
    pub status: String,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub total_tests: Option<i32>,
    pub results: Json<Vec<TestRunResult>>,
    pub error: Option<String>,
}

impl TryFrom<TestRunRow> for TestRun {
    type Error = CoreError;

    fn try_from(row: TestRunRow) -> Result<Self, Self::Error> {
        Ok(TestRun {
            id: row.id,
            org_id: row.org_id,
            project_id: row.project_id,
            suite_id: row.suite_id,
            test_id: row.test_id,
            schedule_id: row.schedule_id,
            browser: row.browser.parse()?,
            branch: row.branch,
            env_overrides: row.env_overrides.0,
            priority: row.priority,
            status: row.status.parse()?,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
            total_tests: row.total_tests,
            results: row.results.0,
            error: row.error,
        })
    }
}
