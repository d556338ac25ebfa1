//! Priority queue views, computed on demand from the store.

use qarun_core::error::CoreError;
use qarun_core::priority::{queue_order, QueuePosition, QueueStatus};
use qarun_core::run::TestRun;
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId};

use crate::engine::RunEngine;

impl RunEngine {
    /// Pending runs of an organization in dispatch order.
    pub async fn queue_status(&self, org_id: DbId) -> QueueStatus {
        QueueStatus::build(org_id, self.store.list_pending(org_id).await)
    }

    /// Position of a pending run within its organization's queue.
    pub async fn queue_position(
        &self,
        org_id: DbId,
        run_id: RunId,
    ) -> Result<QueuePosition, CoreError> {
        let run = self.get_run(org_id, run_id).await?;
        if run.status != RunStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "Run {run_id} is not queued (status '{}')",
                run.status
            )));
        }

        self.queue_status(org_id)
            .await
            .position_of(run_id)
            .ok_or_else(|| CoreError::run_not_found(run_id))
    }

    /// Head of the global pending order, across organizations.
    pub async fn next_pending(&self, limit: usize) -> Vec<TestRun> {
        let mut pending = self
            .store
            .list_by_status(None, &[RunStatus::Pending])
            .await;
        pending.sort_by(queue_order);
        pending.truncate(limit);
        pending
    }
}
