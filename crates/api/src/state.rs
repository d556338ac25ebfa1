use std::sync::Arc;

use qarun_engine::RunEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything lives behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Run engine: store, registry, control surface and queue.
    pub engine: Arc<RunEngine>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
