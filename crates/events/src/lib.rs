//! Lifecycle notification for qarun runs.
//!
//! - [`EventBus`] is the in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`; [`RunEvent`] is its envelope.
//! - [`LifecycleNotifier`] publishes every run state transition to the run
//!   channel and the organization channel, and schedules webhook dispatch.
//! - [`webhook`] defines the external dispatch contract and an HTTP
//!   implementation with exponential-backoff retry.
//!
//! Nothing in this crate can fail a run: publication is fire-and-forget and
//! webhook errors are only logged.

pub mod bus;
pub mod notifier;
pub mod webhook;

pub use bus::{ChannelSubscription, EventBus, RunEvent};
pub use notifier::LifecycleNotifier;
pub use webhook::{HttpWebhookDispatcher, WebhookDispatcher, WebhookError, WebhookPayload};
