//! Lifecycle webhook dispatch.
//!
//! [`WebhookDispatcher`] is the contract the engine schedules webhook
//! deliveries through. [`HttpWebhookDispatcher`] POSTs a JSON-encoded
//! [`WebhookPayload`] to each configured endpoint, retrying failed attempts
//! with exponential backoff (1 s, 2 s, 4 s).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qarun_core::lifecycle::WebhookEvent;
use qarun_core::run::{SuiteInfo, TestRun};
use serde::Serialize;

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// Payload and contract
// ---------------------------------------------------------------------------

/// Body of a lifecycle webhook: the event, a run snapshot (including its
/// results) and suite metadata when known.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub run: TestRun,
    pub suite: Option<SuiteInfo>,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn new(event: WebhookEvent, run: TestRun, suite: Option<SuiteInfo>) -> Self {
        Self {
            event,
            run,
            suite,
            timestamp: Utc::now(),
        }
    }
}

/// External webhook delivery collaborator.
///
/// Implementations own their retry policy. The engine never awaits them on
/// a run's critical path.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<(), WebhookError>;
}

// ---------------------------------------------------------------------------
// HttpWebhookDispatcher
// ---------------------------------------------------------------------------

/// Delivers lifecycle webhooks to a fixed list of endpoints.
pub struct HttpWebhookDispatcher {
    client: reqwest::Client,
    urls: Vec<String>,
    retry_delays: Vec<Duration>,
}

impl HttpWebhookDispatcher {
    /// Create a dispatcher for `urls` with the default backoff schedule.
    pub fn new(urls: Vec<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            urls,
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, retry_delays: Vec<Duration>) -> Self {
        self.retry_delays = retry_delays;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Deliver a payload to one URL with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let mut last_err: Option<WebhookError> = None;

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(url, payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        event = %payload.event,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(url, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(
                    url,
                    event = %payload.event,
                    error = %e,
                    "Webhook delivery failed after all retries",
                );
                Err(last_err.unwrap_or(e))
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .header("x-qarun-event", payload.event.as_str())
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    /// Deliver to every endpoint; one failing endpoint does not stop the
    /// others. Returns the first error encountered.
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let mut first_err = None;
        for url in &self.urls {
            if let Err(e) = self.deliver(url, payload).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use qarun_core::run::NewRun;

    use super::*;

    fn payload() -> WebhookPayload {
        let run = TestRun::new(NewRun::default(), Utc::now()).unwrap();
        WebhookPayload::new(WebhookEvent::RunCompleted, run, None)
    }

    #[test]
    fn new_does_not_panic() {
        let dispatcher = HttpWebhookDispatcher::new(vec!["http://hooks.local/a".into()]).unwrap();
        assert_eq!(dispatcher.urls().len(), 1);
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn payload_serializes_event_name_and_run() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["event"], "run.completed");
        assert_eq!(json["run"]["status"], "pending");
        assert!(json["suite"].is_null());
    }

    #[tokio::test]
    async fn no_endpoints_is_a_no_op() {
        let dispatcher = HttpWebhookDispatcher::new(Vec::new()).unwrap();
        assert!(dispatcher.dispatch(&payload()).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_request_error() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let dispatcher = HttpWebhookDispatcher::new(vec!["http://127.0.0.1:9/hook".into()])
            .unwrap()
            .with_retry_delays(vec![Duration::from_millis(1)]);

        let err = dispatcher.dispatch(&payload()).await.unwrap_err();
        assert!(matches!(err, WebhookError::Request(_)));
    }
}
