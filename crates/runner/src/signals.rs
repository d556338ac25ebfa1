//! Read-only view of a run's cancel and pause flags.
//!
//! The engine's resource registry owns the writing side. Executors receive
//! a [`RunSignals`] inside their [`ExecutionContext`](crate::ExecutionContext)
//! and may poll it between steps.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RunSignals {
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl RunSignals {
    pub fn new(cancel: CancellationToken, paused: watch::Receiver<bool>) -> Self {
        Self { cancel, paused }
    }

    /// Signals that are never raised, for callers outside a registered run.
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(CancellationToken::new(), rx)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Wait while the run is paused.
    ///
    /// Returns `true` when the run may proceed and `false` if it was
    /// cancelled while waiting. A dropped pause sender counts as resumed.
    pub async fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.clone();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn not_paused_proceeds_immediately() {
        let signals = RunSignals::detached();
        assert!(signals.wait_while_paused().await);
        assert!(!signals.is_cancelled());
    }

    #[tokio::test]
    async fn resumes_when_flag_cleared() {
        let (tx, rx) = watch::channel(true);
        let signals = RunSignals::new(CancellationToken::new(), rx);
        assert!(signals.is_paused());

        let waiter = tokio::spawn({
            let signals = signals.clone();
            async move { signals.wait_while_paused().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(false).unwrap();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn cancellation_interrupts_pause() {
        let (_tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let signals = RunSignals::new(cancel.clone(), rx);

        let waiter = tokio::spawn({
            let signals = signals.clone();
            async move { signals.wait_while_paused().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(!waiter.await.unwrap());
    }
}
