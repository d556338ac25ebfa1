use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use qarun_api::config::ServerConfig;
use qarun_api::router::build_app_router;
use qarun_api::state::AppState;
use qarun_db::{MemoryRunArchive, PgRunArchive, RunArchive, RunStore};
use qarun_engine::{Collaborators, EngineConfig, RunDispatcher, RunEngine};
use qarun_events::{EventBus, HttpWebhookDispatcher, LifecycleNotifier};
use qarun_runner::RunnerClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for in-flight runs to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        max_concurrent_runs = engine_config.max_concurrent_runs,
        "Loaded server configuration",
    );

    // --- Run archive ---
    let archive: Arc<dyn RunArchive> = match &config.database_url {
        Some(database_url) => {
            let pool = qarun_db::create_pool(database_url).await?;
            tracing::info!("Database connection pool created");

            qarun_db::health_check(&pool).await?;
            tracing::info!("Database health check passed");

            qarun_db::run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");

            Arc::new(PgRunArchive::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, runs are archived in memory only");
            Arc::new(MemoryRunArchive::new())
        }
    };
    let store = Arc::new(RunStore::new(archive));

    // --- Lifecycle notifier ---
    let event_bus = Arc::new(EventBus::default());
    let webhooks = HttpWebhookDispatcher::new(config.webhook_urls.clone())?;
    tracing::info!(endpoints = webhooks.urls().len(), "Webhook dispatcher configured");
    let notifier = LifecycleNotifier::new(Arc::clone(&event_bus), Arc::new(webhooks));

    // --- Engine ---
    let runner = Arc::new(RunnerClient::new(config.runner_url.clone()));
    tracing::info!(runner_url = %config.runner_url, "Runner client configured");
    let engine = Arc::new(RunEngine::new(
        Arc::clone(&store),
        notifier,
        Collaborators::from_runner(runner),
        engine_config,
    ));

    // --- Dispatcher ---
    let dispatch_cancel = CancellationToken::new();
    let dispatcher = RunDispatcher::new(Arc::clone(&engine));
    let dispatcher_handle = tokio::spawn({
        let cancel = dispatch_cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    // --- Router ---
    let state = AppState {
        engine: Arc::clone(&engine),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    dispatch_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    tracing::info!("Run dispatcher stopped");

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while engine.registry().in_flight().await > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await;
    if drained.is_err() {
        let remaining = engine.registry().in_flight().await;
        tracing::warn!(remaining, "Shutting down with runs still in flight");
    }

    store.flush().await;
    tracing::info!("Run archive flushed");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Registry with an `EnvFilter` and a fmt layer; JSON output when
/// `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "qarun_api=debug,qarun_engine=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
