//! Durable tier of the run store.
//!
//! [`RunArchive`] abstracts the durable replica so the store can run against
//! PostgreSQL in production ([`PgRunArchive`]) and fully in-process in tests
//! or single-node deployments ([`MemoryRunArchive`]).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use qarun_core::error::CoreError;
use qarun_core::run::TestRun;
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId};
use tokio::sync::RwLock;

use crate::repositories::TestRunRepo;
use crate::DbPool;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure talking to the durable tier.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back into a run.
    #[error("Corrupt run record: {0}")]
    Decode(#[from] CoreError),

    #[error("Archive unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable replica of run records (`persistRun` / `loadRun`).
#[async_trait]
pub trait RunArchive: Send + Sync {
    /// Write a full snapshot of the run.
    async fn persist(&self, run: &TestRun) -> Result<(), ArchiveError>;

    async fn load(&self, id: RunId) -> Result<Option<TestRun>, ArchiveError>;

    async fn list_by_status(
        &self,
        org_id: Option<DbId>,
        statuses: &[RunStatus],
    ) -> Result<Vec<TestRun>, ArchiveError>;

    async fn health_check(&self) -> Result<(), ArchiveError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Archive backed by the `test_runs` table.
pub struct PgRunArchive {
    pool: DbPool,
}

impl PgRunArchive {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunArchive for PgRunArchive {
    async fn persist(&self, run: &TestRun) -> Result<(), ArchiveError> {
        TestRunRepo::upsert(&self.pool, run).await?;
        Ok(())
    }

    async fn load(&self, id: RunId) -> Result<Option<TestRun>, ArchiveError> {
        let row = TestRunRepo::find_by_id(&self.pool, id).await?;
        Ok(row.map(TestRun::try_from).transpose()?)
    }

    async fn list_by_status(
        &self,
        org_id: Option<DbId>,
        statuses: &[RunStatus],
    ) -> Result<Vec<TestRun>, ArchiveError> {
        let rows = TestRunRepo::list_by_status(&self.pool, org_id, statuses).await?;
        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(TestRun::try_from(row)?);
        }
        Ok(runs)
    }

    async fn health_check(&self) -> Result<(), ArchiveError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local archive.
///
/// Can be switched into an unavailable state to exercise the store's
/// best-effort write path.
#[derive(Default)]
pub struct MemoryRunArchive {
    runs: RwLock<HashMap<RunId, TestRun>>,
    unavailable: AtomicBool,
    rejected: Mutex<HashSet<RunId>>,
}

impl MemoryRunArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make writes of one run fail while every other call succeeds.
    pub fn reject_run(&self, id: RunId) {
        self.rejected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), ArchiveError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable(
                "in-memory archive is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RunArchive for MemoryRunArchive {
    async fn persist(&self, run: &TestRun) -> Result<(), ArchiveError> {
        self.check_available()?;
        let rejected = self
            .rejected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&run.id);
        if rejected {
            return Err(ArchiveError::Unavailable(format!(
                "writes of run {} are rejected",
                run.id
            )));
        }
        let mut runs = self.runs.write().await;
        // Same rule as the SQL upsert: never un-finish a stored run.
        if let Some(existing) = runs.get(&run.id) {
            if existing.completed_at.is_some() && run.completed_at.is_none() {
                return Ok(());
            }
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load(&self, id: RunId) -> Result<Option<TestRun>, ArchiveError> {
        self.check_available()?;
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_by_status(
        &self,
        org_id: Option<DbId>,
        statuses: &[RunStatus],
    ) -> Result<Vec<TestRun>, ArchiveError> {
        self.check_available()?;
        let mut runs: Vec<TestRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| org_id.map_or(true, |org| r.org_id == org))
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        runs.sort_by(qarun_core::priority::queue_order);
        Ok(runs)
    }

    async fn health_check(&self) -> Result<(), ArchiveError> {
        self.check_available()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
