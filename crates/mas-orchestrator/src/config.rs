use mas_core::{MasError, MasResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default retention of terminal tasks: five minutes.
pub const DEFAULT_TASK_TTL_MS: u64 = 300_000;
/// Default janitor sweep interval: five seconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

fn default_task_ttl_ms() -> u64 {
    DEFAULT_TASK_TTL_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_cancel_on_stop() -> bool {
    true
}

/// Orchestrator options.
///
/// Zero durations are replaced by their defaults in [`normalized`](Self::normalized),
/// so any value is accepted at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long a terminal task is retained before the janitor evicts it.
    #[serde(default = "default_task_ttl_ms")]
    pub task_ttl_ms: u64,
    /// How often the janitor sweeps the task store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of tasks running at once; 0 means unbounded.
    #[serde(default)]
    pub max_concurrent_tasks: usize,
    /// Whether `stop()` cancels every in-flight task.
    #[serde(default = "default_cancel_on_stop")]
    pub cancel_on_stop: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_ttl_ms: default_task_ttl_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_tasks: 0,
            cancel_on_stop: default_cancel_on_stop(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    orchestrator: OrchestratorConfig,
}

impl OrchestratorConfig {
    /// Set the retention of terminal tasks.
    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl_ms = duration_ms(ttl);
        self
    }

    /// Set the janitor sweep interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Cap the number of running tasks; 0 means unbounded.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set whether `stop()` cancels in-flight tasks.
    pub fn with_cancel_on_stop(mut self, cancel: bool) -> Self {
        self.cancel_on_stop = cancel;
        self
    }

    /// Retention of terminal tasks as a `Duration`.
    pub fn task_ttl(&self) -> Duration {
        Duration::from_millis(self.task_ttl_ms)
    }

    /// Sweep interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Replace zero durations with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.task_ttl_ms == 0 {
            warn!(default_ms = DEFAULT_TASK_TTL_MS, "task_ttl_ms is 0, using default");
            self.task_ttl_ms = DEFAULT_TASK_TTL_MS;
        }
        if self.poll_interval_ms == 0 {
            warn!(
                default_ms = DEFAULT_POLL_INTERVAL_MS,
                "poll_interval_ms is 0, using default"
            );
            self.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        self
    }

    /// Parse the `[orchestrator]` table of a TOML document.
    ///
    /// A missing table or missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> MasResult<Self> {
        let file: ConfigFile = toml::from_str(source)
            .map_err(|e| MasError::Config(format!("Invalid orchestrator config: {e}")))?;
        Ok(file.orchestrator)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> MasResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            MasError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as a TOML document with an `[orchestrator]` table.
    pub fn to_toml_string(&self) -> MasResult<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            orchestrator: &'a OrchestratorConfig,
        }
        toml::to_string_pretty(&Out { orchestrator: self })
            .map_err(|e| MasError::Config(format!("Failed to render config: {e}")))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
