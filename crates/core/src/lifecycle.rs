//! Lifecycle event names published to live subscribers and webhooks.
//!
//! Live events use kebab-case names and are published on both the run
//! channel and the organization channel. Webhook events use dotted names.

use std::fmt;

use serde::Serialize;

use crate::types::{DbId, RunId};

/// Run moved to `running` and the loop started.
pub const EVENT_RUN_START: &str = "run-start";

/// A test finished (after retries).
pub const EVENT_RUN_PROGRESS: &str = "run-progress";

/// A failed test is about to be retried.
pub const EVENT_TEST_RETRY: &str = "test-retry";

pub const EVENT_RUN_PAUSED: &str = "run-paused";

pub const EVENT_RUN_RESUMED: &str = "run-resumed";

/// Cancellation was requested; the run is winding down.
pub const EVENT_RUN_CANCELLING: &str = "run-cancelling";

/// Run reached a terminal status.
pub const EVENT_RUN_COMPLETE: &str = "run-complete";

/// Logical publication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum Channel {
    Run(RunId),
    Org(DbId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Run(id) => write!(f, "run:{id}"),
            Channel::Org(id) => write!(f, "org:{id}"),
        }
    }
}

/// Points at which the external webhook dispatcher is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WebhookEvent {
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "run.passed")]
    RunPassed,
    #[serde(rename = "schedule.triggered")]
    ScheduleTriggered,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEvent::RunStarted => "run.started",
            WebhookEvent::RunCompleted => "run.completed",
            WebhookEvent::RunFailed => "run.failed",
            WebhookEvent::RunPassed => "run.passed",
            WebhookEvent::ScheduleTriggered => "schedule.triggered",
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
