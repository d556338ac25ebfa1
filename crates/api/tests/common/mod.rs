#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use qarun_core::run::{BrowserKind, SuiteInfo, TestDefinition, TestRunResult};
use qarun_core::status::TestStatus;
use qarun_core::types::DbId;
use qarun_db::{MemoryRunArchive, RunStore};
use qarun_engine::{Collaborators, EngineConfig, RunEngine};
use qarun_events::{EventBus, HttpWebhookDispatcher, LifecycleNotifier};
use qarun_runner::{
    AutomationHandle, AutomationPool, ExecutionContext, RunnerError, TestCatalog, TestExecutor,
};
use tower::ServiceExt;

use qarun_api::config::ServerConfig;
use qarun_api::router::build_app_router;
use qarun_api::state::AppState;

pub const ORG: DbId = 7;

// ---------------------------------------------------------------------------
// Collaborators: two-test suite where everything passes
// ---------------------------------------------------------------------------

struct PassingRunner;

#[async_trait]
impl AutomationPool for PassingRunner {
    async fn acquire(&self, browser: BrowserKind) -> Result<AutomationHandle, RunnerError> {
        Ok(AutomationHandle {
            id: "session".into(),
            browser,
            acquired_at: Utc::now(),
        })
    }

    async fn release(&self, _handle: &AutomationHandle) -> Result<(), RunnerError> {
        Ok(())
    }
}

#[async_trait]
impl TestExecutor for PassingRunner {
    async fn execute(
        &self,
        test: &TestDefinition,
        _handle: &AutomationHandle,
        _ctx: &ExecutionContext,
    ) -> Result<TestRunResult, RunnerError> {
        Ok(TestRunResult {
            test_id: test.id,
            test_name: test.name.clone(),
            status: TestStatus::Passed,
            duration_ms: 3,
            retry_count: 0,
            passed_on_retry: false,
            error: None,
            steps: serde_json::Value::Null,
        })
    }
}

#[async_trait]
impl TestCatalog for PassingRunner {
    async fn suite(&self, suite_id: DbId) -> Result<Option<SuiteInfo>, RunnerError> {
        Ok(Some(SuiteInfo {
            id: suite_id,
            name: "smoke".into(),
            project_id: 1,
            max_retries: 0,
        }))
    }

    async fn suite_tests(&self, suite_id: DbId) -> Result<Vec<TestDefinition>, RunnerError> {
        Ok((1..=2)
            .map(|id| TestDefinition {
                id,
                name: format!("test-{id}"),
                suite_id,
                steps: serde_json::Value::Null,
            })
            .collect())
    }

    async fn single_test(&self, _test_id: DbId) -> Result<Option<TestDefinition>, RunnerError> {
        Ok(None)
    }

    async fn project_variables(
        &self,
        _project_id: DbId,
    ) -> Result<HashMap<String, String>, RunnerError> {
        Ok(HashMap::new())
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        database_url: None,
        runner_url: "http://localhost:7070".to_string(),
        webhook_urls: Vec::new(),
    }
}

/// The application router plus the engine behind it, so tests can drive
/// execution directly.
pub fn build_test_app() -> (Router, Arc<RunEngine>) {
    let config = test_config();
    let store = Arc::new(RunStore::with_retry_delays(
        Arc::new(MemoryRunArchive::new()),
        vec![Duration::from_millis(1)],
    ));
    let notifier = LifecycleNotifier::new(
        Arc::new(EventBus::default()),
        Arc::new(HttpWebhookDispatcher::new(Vec::new()).unwrap()),
    );
    let runner = Arc::new(PassingRunner);
    let collaborators = Collaborators {
        pool: runner.clone(),
        executor: runner.clone(),
        catalog: runner,
    };
    let engine = Arc::new(RunEngine::new(
        store,
        notifier,
        collaborators,
        EngineConfig::default(),
    ));

    let state = AppState {
        engine: Arc::clone(&engine),
        config: Arc::new(config.clone()),
    };
    (build_app_router(state, &config), engine)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a request, optionally with an org header and a JSON body.
pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    org: Option<DbId>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(org) = org {
        builder = builder.header("x-org-id", org.to_string());
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(ORG), None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(ORG), Some(body)).await
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(ORG), Some(body)).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
