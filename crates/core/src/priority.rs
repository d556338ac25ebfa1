//! Priority ordering of pending runs.
//!
//! The queue is a derived view: it is computed on demand from the run
//! records rather than stored. Lower priority values run sooner; ties are
//! broken by creation time, then by run id so the order is total.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::CoreError;
use crate::run::TestRun;
use crate::status::RunStatus;
use crate::types::{DbId, RunId, Timestamp};

/// Highest urgency.
pub const MIN_PRIORITY: i32 = 1;

/// Lowest urgency.
pub const MAX_PRIORITY: i32 = 1000;

/// Priority assigned when a run is created without one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Validate a requested priority value.
pub fn validate_priority(priority: i32) -> Result<(), CoreError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(CoreError::Validation(format!(
            "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"
        )));
    }
    Ok(())
}

/// Dequeue order: ascending `(priority, created_at, id)`.
pub fn queue_order(a: &TestRun, b: &TestRun) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// One pending run in the queue view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    /// 1-based position.
    pub position: usize,
    pub run_id: RunId,
    pub suite_id: DbId,
    pub priority: i32,
    pub created_at: Timestamp,
}

/// Ordered view of an organization's pending runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub org_id: DbId,
    pub total_pending: usize,
    pub entries: Vec<QueueEntry>,
}

/// Position of a single run within its organization's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuePosition {
    pub run_id: RunId,
    pub position: usize,
    pub total_pending: usize,
}

impl QueueStatus {
    /// Build the view from arbitrary runs; non-pending and foreign runs
    /// are ignored.
    pub fn build(org_id: DbId, runs: impl IntoIterator<Item = TestRun>) -> Self {
        let mut pending: Vec<TestRun> = runs
            .into_iter()
            .filter(|r| r.org_id == org_id && r.status == RunStatus::Pending)
            .collect();
        pending.sort_by(queue_order);

        let entries: Vec<QueueEntry> = pending
            .iter()
            .enumerate()
            .map(|(i, run)| QueueEntry {
                position: i + 1,
                run_id: run.id,
                suite_id: run.suite_id,
                priority: run.priority,
                created_at: run.created_at,
            })
            .collect();

        Self {
            org_id,
            total_pending: entries.len(),
            entries,
        }
    }

    pub fn position_of(&self, run_id: RunId) -> Option<QueuePosition> {
        self.entries
            .iter()
            .find(|e| e.run_id == run_id)
            .map(|e| QueuePosition {
                run_id,
                position: e.position,
                total_pending: self.total_pending,
            })
    }
}
