//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

/// Env var overriding [`OrchestratorConfig::max_concurrent_watches`].
pub const ENV_MAX_CONCURRENT_WATCHES: &str = "MONOFLOW_MAX_CONCURRENT_WATCHES";

/// Env var overriding [`OrchestratorConfig::watch_timeout`], in seconds.
pub const ENV_WATCH_TIMEOUT_SECS: &str = "MONOFLOW_WATCH_TIMEOUT_SECS";

/// Tuning knobs for [`crate::orchestrator::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs awaited at once within a layer.
    pub max_concurrent_watches: usize,

    /// Deadline for a single watch. A job still unresolved when it elapses
    /// is recorded as errored.
    pub watch_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_watches: 16,
            watch_timeout: None,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `MONOFLOW_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_WATCHES) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config = config.with_max_concurrent_watches(n),
                _ => warn!(var = ENV_MAX_CONCURRENT_WATCHES, value = %raw, "ignoring invalid value"),
            }
        }

        if let Some(raw) = lookup(ENV_WATCH_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.watch_timeout = None,
                Ok(secs) => config.watch_timeout = Some(Duration::from_secs(secs)),
                Err(_) => warn!(var = ENV_WATCH_TIMEOUT_SECS, value = %raw, "ignoring invalid value"),
            }
        }

        config
    }

    /// Clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn with_max_concurrent_watches(mut self, n: usize) -> Self {
        self.max_concurrent_watches = n.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = Some(timeout);
        self
    }
}
