//! Lifecycle notifier.
//!
//! Every run state transition is published twice on the [`EventBus`]: once
//! on the run's channel and once on its organization's channel. Webhook
//! dispatch is scheduled on a detached task; its latency and failures never
//! reach the caller.

use std::sync::Arc;

use chrono::Utc;
use qarun_core::lifecycle::{Channel, WebhookEvent};
use qarun_core::run::{SuiteInfo, TestRun};
use qarun_core::types::{DbId, RunId};

use crate::bus::{EventBus, RunEvent};
use crate::webhook::{WebhookDispatcher, WebhookPayload};

/// Fire-and-forget publisher of run lifecycle events.
#[derive(Clone)]
pub struct LifecycleNotifier {
    bus: Arc<EventBus>,
    webhooks: Arc<dyn WebhookDispatcher>,
}

impl LifecycleNotifier {
    pub fn new(bus: Arc<EventBus>, webhooks: Arc<dyn WebhookDispatcher>) -> Self {
        Self { bus, webhooks }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish `event` on the run channel and the organization channel.
    pub fn notify(&self, run_id: RunId, org_id: DbId, event: &str, payload: serde_json::Value) {
        let timestamp = Utc::now();
        for channel in [Channel::Run(run_id), Channel::Org(org_id)] {
            self.bus.publish(RunEvent {
                channel,
                event: event.to_string(),
                run_id,
                org_id,
                payload: payload.clone(),
                timestamp,
            });
        }
        tracing::debug!(run_id = %run_id, org_id, event, "Lifecycle event published");
    }

    /// Schedule a webhook dispatch. Must be called from within a Tokio
    /// runtime; returns immediately.
    pub fn dispatch_webhook(&self, event: WebhookEvent, run: &TestRun, suite: Option<&SuiteInfo>) {
        let payload = WebhookPayload::new(event, run.clone(), suite.cloned());
        let webhooks = Arc::clone(&self.webhooks);

        tokio::spawn(async move {
            if let Err(e) = webhooks.dispatch(&payload).await {
                tracing::warn!(
                    run_id = %payload.run.id,
                    event = %payload.event,
                    error = %e,
                    "Lifecycle webhook dispatch failed"
                );
            }
        });
    }
}
