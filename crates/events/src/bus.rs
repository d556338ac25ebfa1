//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`RunEvent`]s. It is
//! designed to be shared via `Arc<EventBus>`. Subscribers either receive
//! every event ([`EventBus::subscribe`]) or only those addressed to one
//! logical channel ([`EventBus::subscribe_channel`]).

use chrono::{DateTime, Utc};
use qarun_core::lifecycle::Channel;
use qarun_core::types::{DbId, RunId};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// A run lifecycle event addressed to one logical channel.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub channel: Channel,

    /// Kebab-case event name, e.g. `"run-progress"`.
    pub event: String,

    pub run_id: RunId,
    pub org_id: DbId,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: RunEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single channel.
    pub fn subscribe_channel(&self, channel: Channel) -> ChannelSubscription {
        ChannelSubscription {
            channel,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// ChannelSubscription
// ---------------------------------------------------------------------------

/// Receiver filtered to one [`Channel`].
pub struct ChannelSubscription {
    channel: Channel,
    receiver: broadcast::Receiver<RunEvent>,
}

impl ChannelSubscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next event on this channel, or `None` once the bus is gone.
    ///
    /// Lagging is logged and skipped; a dashboard can always re-read the
    /// run record to catch up.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.channel == self.channel => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        channel = %self.channel,
                        skipped = n,
                        "Channel subscriber lagged, some events were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
