use std::time::Duration;

/// Tunables for the engine and its dispatcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a non-forced cancel waits for the loop to finalize.
    pub cancel_grace: Duration,
    /// Upper bound on concurrently executing runs.
    pub max_concurrent_runs: usize,
    /// Dispatcher poll interval.
    pub poll_interval: Duration,
    /// Terminal runs older than this are evicted from the fast tier.
    pub terminal_retention: Duration,
    /// How often the dispatcher evicts terminal runs.
    pub prune_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_millis(5_000),
            max_concurrent_runs: 4,
            poll_interval: Duration::from_secs(1),
            terminal_retention: Duration::from_secs(3_600),
            prune_interval: Duration::from_secs(60),
        }
    }
}

/// A malformed engine setting.
#[derive(Debug, thiserror::Error)]
#[error("{key} must be a valid {expected}, got '{value}'")]
pub struct ConfigError {
    pub key: &'static str,
    pub expected: &'static str,
    pub value: String,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `CANCEL_GRACE_MS`         | `5000`  |
    /// | `MAX_CONCURRENT_RUNS`     | `4`     |
    /// | `DISPATCH_POLL_MS`        | `1000`  |
    /// | `TERMINAL_RETENTION_SECS` | `3600`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cancel_grace = env_u64("CANCEL_GRACE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.cancel_grace);

        let max_concurrent_runs = match env_u64("MAX_CONCURRENT_RUNS")? {
            Some(0) => {
                return Err(ConfigError {
                    key: "MAX_CONCURRENT_RUNS",
                    expected: "positive integer",
                    value: "0".into(),
                })
            }
            Some(n) => n as usize,
            None => defaults.max_concurrent_runs,
        };

        let poll_interval = env_u64("DISPATCH_POLL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let terminal_retention = env_u64("TERMINAL_RETENTION_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.terminal_retention);

        Ok(Self {
            cancel_grace,
            max_concurrent_runs,
            poll_interval,
            terminal_retention,
            prune_interval: defaults.prune_interval,
        })
    }
}

fn env_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| ConfigError {
            key,
            expected: "u64",
            value,
        }),
        Err(_) => Ok(None),
    }
}
