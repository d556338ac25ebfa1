//! Ephemeral per-run execution state.
//!
//! An entry exists exactly while an execution loop is in flight for a run.
//! It carries the automation handle once acquired, the cancellation token
//! and the pause flag. Absence of an entry means no loop is running for
//! that run, whatever its persisted status says. Nothing here is persisted.

use std::collections::HashMap;
use std::time::Duration;

use qarun_core::error::CoreError;
use qarun_core::types::RunId;
use qarun_runner::{AutomationHandle, RunSignals};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

struct RegistryEntry {
    handle: Option<AutomationHandle>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    /// Flipped to `true` on removal; also observed as closed once dropped.
    finished: watch::Sender<bool>,
}

impl RegistryEntry {
    fn signals(&self) -> RunSignals {
        RunSignals::new(self.cancel.clone(), self.paused.subscribe())
    }
}

/// Registry of in-flight runs.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: RwLock<HashMap<RunId, RegistryEntry>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a run about to execute.
    ///
    /// Fails with `Conflict` if a loop is already registered for the run.
    pub async fn register(&self, run_id: RunId) -> Result<RunSignals, CoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&run_id) {
            return Err(CoreError::Conflict(format!(
                "Run {run_id} is already executing"
            )));
        }

        let (paused, _) = watch::channel(false);
        let (finished, _) = watch::channel(false);
        let entry = RegistryEntry {
            handle: None,
            cancel: CancellationToken::new(),
            paused,
            finished,
        };
        let signals = entry.signals();
        entries.insert(run_id, entry);
        Ok(signals)
    }

    /// Record the acquired automation handle. Returns `false` if the run is
    /// not registered.
    pub async fn attach_handle(&self, run_id: RunId, handle: AutomationHandle) -> bool {
        match self.entries.write().await.get_mut(&run_id) {
            Some(entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    pub async fn handle(&self, run_id: RunId) -> Option<AutomationHandle> {
        self.entries
            .read()
            .await
            .get(&run_id)
            .and_then(|e| e.handle.clone())
    }

    pub async fn signals(&self, run_id: RunId) -> Option<RunSignals> {
        self.entries.read().await.get(&run_id).map(RegistryEntry::signals)
    }

    /// Raise the cancellation flag and hand back the automation handle (if
    /// one was attached) so the caller can tear it down. The handle stays
    /// attached; the loop releases it again on exit.
    pub async fn cancel(&self, run_id: RunId) -> Option<AutomationHandle> {
        let entries = self.entries.read().await;
        let entry = entries.get(&run_id)?;
        entry.cancel.cancel();
        entry.handle.clone()
    }

    /// Set or clear the pause flag. Returns `false` if the run is not
    /// registered.
    pub async fn set_paused(&self, run_id: RunId, paused: bool) -> bool {
        match self.entries.read().await.get(&run_id) {
            Some(entry) => {
                entry.paused.send_replace(paused);
                true
            }
            None => false,
        }
    }

    pub async fn is_cancelled(&self, run_id: RunId) -> bool {
        self.entries
            .read()
            .await
            .get(&run_id)
            .is_some_and(|e| e.cancel.is_cancelled())
    }

    /// Destroy the entry, returning the handle for release.
    pub async fn remove(&self, run_id: RunId) -> Option<AutomationHandle> {
        let entry = self.entries.write().await.remove(&run_id)?;
        entry.finished.send_replace(true);
        entry.handle
    }

    pub async fn contains(&self, run_id: RunId) -> bool {
        self.entries.read().await.contains_key(&run_id)
    }

    /// Number of runs with a loop in flight.
    pub async fn in_flight(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Wait up to `timeout` for the run's entry to be removed.
    ///
    /// Returns `true` once no entry exists (immediately if none was
    /// registered) and `false` if the timeout elapsed first.
    pub async fn wait_finished(&self, run_id: RunId, timeout: Duration) -> bool {
        let mut finished = match self.entries.read().await.get(&run_id) {
            Some(entry) => entry.finished.subscribe(),
            None => return true,
        };

        // A closed channel means the entry was dropped: also finished.
        // Bound to a local so the borrow of `finished` ends before it is dropped.
        let finished_in_time = tokio::time::timeout(timeout, finished.wait_for(|done| *done))
            .await
            .is_ok();
        finished_in_time
    }
}
