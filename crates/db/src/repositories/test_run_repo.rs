//! Repository for the `test_runs` table.

use qarun_core::run::TestRun;
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::test_run::TestRunRow;

/// Column list for `test_runs` queries.
const COLUMNS: &str = "\
    id, org_id, project_id, suite_id, test_id, schedule_id, \
    browser, branch, env_overrides, priority, status, \
    created_at, started_at, completed_at, duration_ms, \
    total_tests, results, error";

/// Provides persistence for test run snapshots.
pub struct TestRunRepo;

impl TestRunRepo {
    /// Insert or replace a run snapshot.
    ///
    /// A row that already carries `completed_at` is never overwritten by a
    /// non-terminal snapshot, so a delayed write cannot resurrect a
    /// finished run.
    pub async fn upsert(pool: &PgPool, run: &TestRun) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO test_runs ( \
                 id, org_id, project_id, suite_id, test_id, schedule_id, \
                 browser, branch, env_overrides, priority, status, \
                 created_at, started_at, completed_at, duration_ms, \
                 total_tests, results, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
                     $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (id) DO UPDATE SET \
                 priority = EXCLUDED.priority, \
                 status = EXCLUDED.status, \
                 started_at = EXCLUDED.started_at, \
                 completed_at = EXCLUDED.completed_at, \
                 duration_ms = EXCLUDED.duration_ms, \
                 total_tests = EXCLUDED.total_tests, \
                 results = EXCLUDED.results, \
                 error = EXCLUDED.error, \
                 updated_at = NOW() \
             WHERE test_runs.completed_at IS NULL \
                OR EXCLUDED.completed_at IS NOT NULL",
        )
        .bind(run.id)
        .bind(run.org_id)
        .bind(run.project_id)
        .bind(run.suite_id)
        .bind(run.test_id)
        .bind(run.schedule_id)
        .bind(run.browser.as_str())
        .bind(&run.branch)
        .bind(Json(&run.env_overrides))
        .bind(run.priority)
        .bind(run.status.as_str())
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.duration_ms)
        .bind(run.total_tests)
        .bind(Json(&run.results))
        .bind(&run.error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a run by its ID.
    pub async fn find_by_id(pool: &PgPool, id: RunId) -> Result<Option<TestRunRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_runs WHERE id = $1");
        sqlx::query_as::<_, TestRunRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List runs in any of `statuses`, optionally scoped to one organization.
    ///
    /// Rows come back in queue order so pending listings need no re-sort.
    pub async fn list_by_status(
        pool: &PgPool,
        org_id: Option<DbId>,
        statuses: &[RunStatus],
    ) -> Result<Vec<TestRunRow>, sqlx::Error> {
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let query = format!(
            "SELECT {COLUMNS} FROM test_runs \
             WHERE ($1::BIGINT IS NULL OR org_id = $1) \
               AND status = ANY($2) \
             ORDER BY priority ASC, created_at ASC, id ASC"
        );
        sqlx::query_as::<_, TestRunRow>(&query)
            .bind(org_id)
            .bind(names)
            .fetch_all(pool)
            .await
    }
}
