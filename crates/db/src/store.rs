//! Authoritative two-tier run store.
//!
//! The fast tier is an in-memory map from run id to a per-run mutex. The map
//! lock is held only long enough to find or insert an entry; all reads and
//! writes of a run's fields happen under that run's own lock, so concurrent
//! runs never contend and two writers on the same run are serialized.
//!
//! Precedence between tiers is defined in one place, [`resolve_tiers`] and
//! [`merge_listing`]: a fast-tier copy always wins, and the durable copy is
//! used only for runs the fast tier does not hold. Mutating a run that is
//! only durable first hydrates it into the fast tier, so every mutation
//! acts on the single in-memory copy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use qarun_core::error::CoreError;
use qarun_core::run::{RunPatch, TestRun};
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId};
use tokio::sync::{Mutex, RwLock};

use crate::archive::RunArchive;
use crate::persist::{PersistQueue, WriteState, DEFAULT_RETRY_DELAYS};

type RunCell = Arc<Mutex<TestRun>>;

/// Pick the authoritative copy of a single run.
pub fn resolve_tiers(live: Option<TestRun>, durable: Option<TestRun>) -> Option<TestRun> {
    live.or(durable)
}

/// Combine a listing from both tiers.
///
/// `live_ids` must contain every run id the fast tier holds, whether or not
/// it matched the listing filter: a durable row is stale whenever a live
/// copy exists, even if that copy has since moved to another status.
pub fn merge_listing(
    live: Vec<TestRun>,
    live_ids: &HashSet<RunId>,
    durable: Vec<TestRun>,
) -> Vec<TestRun> {
    let mut merged = live;
    merged.extend(durable.into_iter().filter(|r| !live_ids.contains(&r.id)));
    merged
}

/// The Run Record Store.
pub struct RunStore {
    live: RwLock<HashMap<RunId, RunCell>>,
    archive: Arc<dyn RunArchive>,
    persist: PersistQueue,
}

impl RunStore {
    /// Create a store and start its background writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(archive: Arc<dyn RunArchive>) -> Self {
        Self::with_retry_delays(archive, DEFAULT_RETRY_DELAYS.to_vec())
    }

    pub fn with_retry_delays(archive: Arc<dyn RunArchive>, retry_delays: Vec<Duration>) -> Self {
        let (persist, _writer) = PersistQueue::spawn(Arc::clone(&archive), retry_delays);
        Self {
            live: RwLock::new(HashMap::new()),
            archive,
            persist,
        }
    }

    /// The durable tier, for health checks.
    pub fn archive(&self) -> &Arc<dyn RunArchive> {
        &self.archive
    }

    /// Insert a new run. Fails with `Conflict` if the id is already known.
    pub async fn create(&self, run: TestRun) -> Result<TestRun, CoreError> {
        let mut live = self.live.write().await;
        if live.contains_key(&run.id) {
            return Err(CoreError::Conflict(format!("Run {} already exists", run.id)));
        }
        live.insert(run.id, Arc::new(Mutex::new(run.clone())));
        self.persist.enqueue(run.clone());
        Ok(run)
    }

    /// Current record for a run, preferring the fast tier.
    pub async fn get(&self, id: RunId) -> Option<TestRun> {
        let live = match self.cell(id).await {
            Some(cell) => Some(cell.lock().await.clone()),
            None => None,
        };
        if live.is_some() {
            return live;
        }
        resolve_tiers(live, self.load_durable(id).await)
    }

    /// Apply a partial update. Returns `None` if the run is unknown.
    pub async fn update(&self, id: RunId, patch: RunPatch) -> Option<TestRun> {
        self.modify(id, |_| Ok(patch)).await.ok()
    }

    /// Apply `patch` only if `guard` accepts the current record.
    ///
    /// The guard and the write happen under the run's lock, so no other
    /// writer can slip in between the check and the update.
    pub async fn update_if<G>(
        &self,
        id: RunId,
        guard: G,
        patch: RunPatch,
    ) -> Result<TestRun, CoreError>
    where
        G: FnOnce(&TestRun) -> Result<(), CoreError>,
    {
        self.modify(id, move |run| guard(run).map(|()| patch)).await
    }

    /// Atomically derive a patch from the current record and apply it.
    ///
    /// This is the single write path of the store. The post-mutation
    /// snapshot is handed to the persistence queue while the run's lock is
    /// still held, so durable writes for one run are queued in the order
    /// they were applied.
    pub async fn modify<F>(&self, id: RunId, f: F) -> Result<TestRun, CoreError>
    where
        F: FnOnce(&TestRun) -> Result<RunPatch, CoreError>,
    {
        let cell = self
            .hydrated_cell(id)
            .await
            .ok_or_else(|| CoreError::run_not_found(id))?;

        let mut run = cell.lock().await;
        let patch = f(&*run)?;
        if patch.apply(&mut *run, Utc::now()) {
            self.persist.enqueue(run.clone());
        }
        Ok(run.clone())
    }

    /// Pending runs of one organization (unordered).
    pub async fn list_pending(&self, org_id: DbId) -> Vec<TestRun> {
        self.list_by_status(Some(org_id), &[RunStatus::Pending]).await
    }

    /// Runs in any of `statuses`, optionally restricted to one organization.
    pub async fn list_by_status(
        &self,
        org_id: Option<DbId>,
        statuses: &[RunStatus],
    ) -> Vec<TestRun> {
        let wanted = |run: &TestRun| {
            org_id.map_or(true, |org| run.org_id == org) && statuses.contains(&run.status)
        };

        let snapshot = self.live_snapshot().await;
        let live_ids: HashSet<RunId> = snapshot.iter().map(|r| r.id).collect();
        let live: Vec<TestRun> = snapshot.into_iter().filter(|r| wanted(r)).collect();

        let durable = match self.archive.list_by_status(org_id, statuses).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(error = %e, "Durable listing failed, serving fast tier only");
                Vec::new()
            }
        };

        merge_listing(live, &live_ids, durable)
    }

    /// Evict terminal runs completed more than `older_than` ago from the
    /// fast tier.
    ///
    /// A run is evicted only once the archive holds its final snapshot.
    /// Candidates whose last write was given up on are queued again, and
    /// outstanding writes are flushed before checking; runs that are still
    /// not durable stay in memory until a later prune.
    pub async fn prune_terminal(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let candidates: Vec<TestRun> = self
            .live_snapshot()
            .await
            .into_iter()
            .filter(|r| r.is_terminal() && r.completed_at.is_some_and(|t| t <= cutoff))
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        for run in &candidates {
            if self.persist.state(run.id) == WriteState::Dropped {
                self.persist.enqueue(run.clone());
            }
        }
        self.persist.flush().await;

        let mut live = self.live.write().await;
        let mut evicted = 0;
        let mut retained = 0;
        for run in candidates {
            let still_terminal = match live.get(&run.id) {
                Some(cell) => cell.try_lock().map(|r| r.is_terminal()).unwrap_or(false),
                None => false,
            };
            if !still_terminal {
                continue;
            }
            if self.persist.state(run.id) == WriteState::Durable {
                live.remove(&run.id);
                evicted += 1;
            } else {
                retained += 1;
            }
        }
        if retained > 0 {
            tracing::warn!(
                retained,
                "Finished runs kept in memory until their final state is durable",
            );
        }
        tracing::debug!(evicted, "Pruned terminal runs from fast tier");
        evicted
    }

    /// Number of runs held in the fast tier.
    pub async fn live_len(&self) -> usize {
        self.live.read().await.len()
    }

    /// Wait until every queued durable write has been attempted. Called on
    /// shutdown and before eviction.
    pub async fn flush(&self) {
        self.persist.flush().await;
    }

    // ---- private helpers ----

    async fn cell(&self, id: RunId) -> Option<RunCell> {
        self.live.read().await.get(&id).cloned()
    }

    /// Fast-tier cell for `id`, loading it from the archive on a miss.
    async fn hydrated_cell(&self, id: RunId) -> Option<RunCell> {
        if let Some(cell) = self.cell(id).await {
            return Some(cell);
        }

        let durable = self.load_durable(id).await?;
        let mut live = self.live.write().await;
        // Another task may have hydrated the run while we were loading.
        let cell = live
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(durable)))
            .clone();
        tracing::debug!(run_id = %id, "Hydrated run into fast tier");
        Some(cell)
    }

    async fn load_durable(&self, id: RunId) -> Option<TestRun> {
        match self.archive.load(id).await {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(run_id = %id, error = %e, "Durable load failed");
                None
            }
        }
    }

    async fn live_snapshot(&self) -> Vec<TestRun> {
        let cells: Vec<RunCell> = self.live.read().await.values().cloned().collect();
        let mut runs = Vec::with_capacity(cells.len());
        for cell in cells {
            runs.push(cell.lock().await.clone());
        }
        runs
    }
}
