//! REST client for the browser-runner service.
//!
//! Wraps the runner's HTTP API (session acquisition and teardown, single
//! test execution, catalog lookups) using [`reqwest`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use qarun_core::run::{BrowserKind, SuiteInfo, TestDefinition, TestRunResult};
use qarun_core::types::DbId;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::contracts::{
    AutomationHandle, AutomationPool, ExecutionContext, RunnerError, TestCatalog, TestExecutor,
};

/// HTTP client for one runner service.
pub struct RunnerClient {
    client: reqwest::Client,
    base_url: String,
}

/// Response of `POST /sessions`.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

impl RunnerClient {
    /// * `base_url` - e.g. `http://runner:7070`, without trailing slash.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GET a JSON resource, mapping 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, RunnerError> {
        let response = self.client.get(self.url(path)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RunnerError> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::parse_response(response).await
    }

    /// Check for a 2xx status and deserialize the JSON body.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RunnerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunnerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AutomationPool for RunnerClient {
    async fn acquire(&self, browser: BrowserKind) -> Result<AutomationHandle, RunnerError> {
        let response = self
            .client
            .post(self.url("/sessions"))
            .json(&serde_json::json!({ "browser": browser }))
            .send()
            .await?;

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            let reason = response.text().await.unwrap_or_default();
            return Err(RunnerError::Unavailable { browser, reason });
        }

        let session: SessionResponse = Self::parse_response(response).await?;
        tracing::debug!(session_id = %session.session_id, %browser, "Automation session acquired");

        Ok(AutomationHandle {
            id: session.session_id,
            browser,
            acquired_at: Utc::now(),
        })
    }

    async fn release(&self, handle: &AutomationHandle) -> Result<(), RunnerError> {
        let response = self
            .client
            .delete(self.url(&format!("/sessions/{}", handle.id)))
            .send()
            .await?;

        // Already gone counts as released.
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RunnerError::Api {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl TestExecutor for RunnerClient {
    async fn execute(
        &self,
        test: &TestDefinition,
        handle: &AutomationHandle,
        ctx: &ExecutionContext,
    ) -> Result<TestRunResult, RunnerError> {
        let body = serde_json::json!({
            "test": test,
            "run_id": ctx.run_id,
            "org_id": ctx.org_id,
            "env": ctx.env,
        });

        let request = self
            .client
            .post(self.url(&format!("/sessions/{}/execute", handle.id)))
            .json(&body)
            .send();

        // The remote call cannot observe the pause flag, but cancellation
        // drops the in-flight request instead of waiting it out.
        let response = tokio::select! {
            response = request => response?,
            _ = ctx.signals.cancelled() => {
                return Err(RunnerError::Aborted(format!("run {} cancelled", ctx.run_id)));
            }
        };

        Self::parse_response(response).await
    }
}

#[async_trait]
impl TestCatalog for RunnerClient {
    async fn suite(&self, suite_id: DbId) -> Result<Option<SuiteInfo>, RunnerError> {
        self.get_optional(&format!("/suites/{suite_id}")).await
    }

    async fn suite_tests(&self, suite_id: DbId) -> Result<Vec<TestDefinition>, RunnerError> {
        self.get_json(&format!("/suites/{suite_id}/tests")).await
    }

    async fn single_test(&self, test_id: DbId) -> Result<Option<TestDefinition>, RunnerError> {
        self.get_optional(&format!("/tests/{test_id}")).await
    }

    async fn project_variables(
        &self,
        project_id: DbId,
    ) -> Result<HashMap<String, String>, RunnerError> {
        self.get_json(&format!("/projects/{project_id}/variables")).await
    }
}
