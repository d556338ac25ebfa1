//! Background writer for the durable tier.
//!
//! State transitions never wait on the database. The store hands every
//! post-mutation snapshot to [`PersistQueue::enqueue`], which keeps only the
//! latest unwritten snapshot per run. A single background task writes all
//! ready snapshots concurrently and schedules retries per run with backoff,
//! so one failing run never holds up writes for the others. A snapshot that
//! still fails after the last retry is logged and dropped; the store learns
//! about it through [`PersistQueue::state`] and keeps the run in memory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use qarun_core::run::TestRun;
use qarun_core::types::RunId;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::archive::{ArchiveError, RunArchive};

/// Backoff between write attempts (1s, 2s, 4s).
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Where the most recent snapshot of a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// The archive accepted the latest snapshot (or none was ever queued).
    Durable,
    /// A snapshot is queued, being written, or waiting for a retry.
    Outstanding,
    /// The latest snapshot was given up on after the last retry.
    Dropped,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct Slot {
    run: TestRun,
    seq: u64,
    attempt: usize,
    ready_at: Instant,
}

#[derive(Default)]
struct Ledger {
    next_seq: u64,
    /// Latest unwritten snapshot per run.
    queued: HashMap<RunId, Slot>,
    /// Runs with a write in progress, with the sequence number being written.
    writing: HashMap<RunId, u64>,
    dropped: HashSet<RunId>,
    flush_waiters: Vec<(u64, oneshot::Sender<()>)>,
}

impl Ledger {
    fn enqueue(&mut self, run: TestRun, now: Instant) {
        self.next_seq += 1;
        let slot = Slot {
            seq: self.next_seq,
            attempt: 0,
            ready_at: now,
            run,
        };
        // A newer snapshot supersedes whatever was still waiting.
        if self.queued.insert(slot.run.id, slot).is_some() {
            self.release_flush_waiters();
        }
    }

    /// Take every snapshot due for a write. Also returns the earliest
    /// pending retry time among the snapshots left behind.
    fn take_ready(&mut self, now: Instant) -> (Vec<Slot>, Option<Instant>) {
        let due: Vec<RunId> = self
            .queued
            .iter()
            .filter(|(id, slot)| slot.ready_at <= now && !self.writing.contains_key(*id))
            .map(|(id, _)| *id)
            .collect();

        let mut batch = Vec::with_capacity(due.len());
        for id in due {
            if let Some(slot) = self.queued.remove(&id) {
                self.writing.insert(id, slot.seq);
                batch.push(slot);
            }
        }

        let next_retry = self
            .queued
            .iter()
            .filter(|(id, _)| !self.writing.contains_key(*id))
            .map(|(_, slot)| slot.ready_at)
            .min();
        (batch, next_retry)
    }

    fn complete(
        &mut self,
        slot: Slot,
        result: Result<(), ArchiveError>,
        retry_delays: &[Duration],
        now: Instant,
    ) {
        let id = slot.run.id;
        self.writing.remove(&id);

        match result {
            Ok(()) => {
                self.dropped.remove(&id);
            }
            Err(e) if self.queued.contains_key(&id) => {
                tracing::debug!(run_id = %id, error = %e, "Superseded snapshot write failed");
            }
            Err(e) => match retry_delays.get(slot.attempt) {
                Some(delay) => {
                    tracing::warn!(
                        run_id = %id,
                        attempt = slot.attempt + 1,
                        error = %e,
                        "Run snapshot write failed, retrying",
                    );
                    self.queued.insert(
                        id,
                        Slot {
                            attempt: slot.attempt + 1,
                            ready_at: now + *delay,
                            ..slot
                        },
                    );
                }
                None => {
                    tracing::error!(
                        run_id = %id,
                        status = %slot.run.status,
                        error = %e,
                        "Run snapshot write failed after all retries",
                    );
                    self.dropped.insert(id);
                }
            },
        }

        self.release_flush_waiters();
    }

    /// Oldest sequence number not yet written or given up on.
    fn oldest_outstanding(&self) -> Option<u64> {
        self.queued
            .values()
            .map(|slot| slot.seq)
            .chain(self.writing.values().copied())
            .min()
    }

    fn release_flush_waiters(&mut self) {
        let oldest = self.oldest_outstanding();
        let waiters = std::mem::take(&mut self.flush_waiters);
        for (target, done) in waiters {
            if oldest.is_some_and(|seq| seq <= target) {
                self.flush_waiters.push((target, done));
            } else {
                let _ = done.send(());
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.writing.is_empty()
    }

    fn state(&self, id: RunId) -> WriteState {
        if self.queued.contains_key(&id) || self.writing.contains_key(&id) {
            WriteState::Outstanding
        } else if self.dropped.contains(&id) {
            WriteState::Dropped
        } else {
            WriteState::Durable
        }
    }
}

struct Shared {
    ledger: Mutex<Ledger>,
    wake: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A panic while holding the lock leaves the maps consistent; keep going.
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Signals the writer once the last [`PersistQueue`] clone is gone.
struct Closer(Arc<Shared>);

impl Drop for Closer {
    fn drop(&mut self) {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.wake.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Queue handle
// ---------------------------------------------------------------------------

/// Sending half of the persistence queue. Cheap to clone.
#[derive(Clone)]
pub struct PersistQueue {
    shared: Arc<Shared>,
    _closer: Arc<Closer>,
}

impl PersistQueue {
    /// Start the writer task.
    ///
    /// The task exits once every [`PersistQueue`] clone has been dropped
    /// and every outstanding snapshot has been written or given up on.
    pub fn spawn(
        archive: Arc<dyn RunArchive>,
        retry_delays: Vec<Duration>,
    ) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            ledger: Mutex::new(Ledger::default()),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let handle = tokio::spawn(run_writer(Arc::clone(&shared), archive, retry_delays));
        let queue = Self {
            _closer: Arc::new(Closer(Arc::clone(&shared))),
            shared,
        };
        (queue, handle)
    }

    /// Queue a snapshot for writing. Never blocks on the archive.
    pub fn enqueue(&self, run: TestRun) {
        self.shared.ledger().enqueue(run, Instant::now());
        self.shared.wake.notify_one();
    }

    /// Wait until every snapshot queued before this call has been written,
    /// superseded, or given up on.
    pub async fn flush(&self) {
        let done_rx = {
            let mut ledger = self.shared.ledger();
            let target = ledger.next_seq;
            if !ledger.oldest_outstanding().is_some_and(|seq| seq <= target) {
                return;
            }
            let (done_tx, done_rx) = oneshot::channel();
            ledger.flush_waiters.push((target, done_tx));
            done_rx
        };
        let _ = done_rx.await;
    }

    /// Durability of the latest snapshot of `id`.
    pub fn state(&self, id: RunId) -> WriteState {
        self.shared.ledger().state(id)
    }
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

async fn run_writer(
    shared: Arc<Shared>,
    archive: Arc<dyn RunArchive>,
    retry_delays: Vec<Duration>,
) {
    loop {
        let (batch, next_retry) = shared.ledger().take_ready(Instant::now());

        if batch.is_empty() {
            if shared.closed.load(Ordering::SeqCst) && shared.ledger().is_idle() {
                break;
            }
            let retry_due = async {
                match next_retry {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = retry_due => {}
            }
            continue;
        }

        let outcomes = join_all(batch.into_iter().map(|slot| {
            let archive = Arc::clone(&archive);
            async move {
                let result = archive.persist(&slot.run).await;
                (slot, result)
            }
        }))
        .await;

        let now = Instant::now();
        let mut ledger = shared.ledger();
        for (slot, result) in outcomes {
            ledger.complete(slot, result, &retry_delays, now);
        }
    }
    tracing::debug!("Persistence queue closed, writer shutting down");
}
