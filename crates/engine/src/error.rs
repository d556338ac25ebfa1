use qarun_core::run::BrowserKind;
use qarun_runner::RunnerError;

/// Uncaught failure of an execution loop. Either variant finalizes the run
/// as `error` with the error's message; per-test failures never end up here.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to acquire {browser} automation resource: {source}")]
    ResourceAcquisition {
        browser: BrowserKind,
        #[source]
        source: RunnerError,
    },

    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<RunnerError> for ExecutionError {
    fn from(err: RunnerError) -> Self {
        ExecutionError::Infrastructure(err.to_string())
    }
}
