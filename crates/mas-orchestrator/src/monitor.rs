use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How one agent invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The agent returned output.
    Completed,
    /// The agent returned an error or panicked.
    Failed,
    /// The task was cancelled during the invocation.
    Cancelled,
}

/// Counters tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub runs: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Invocations currently in flight.
    pub active: u64,
    pub total_duration_ms: u64,
}

/// Activity of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

/// Real-time snapshot of one agent's activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent: String,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

/// Tracks activity and metrics for every agent the dispatcher invokes.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark an agent as working on one more invocation.
    pub async fn start_run(&self, agent: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.to_string())
            .or_insert_with(|| AgentState {
                agent: agent.to_string(),
                status: WorkerStatus::Idle,
                metrics: AgentMetrics::default(),
            });
        state.metrics.runs += 1;
        state.metrics.active += 1;
        state.status = WorkerStatus::Working;
    }

    /// Record the end of an invocation started with [`start_run`](Self::start_run).
    pub async fn finish_run(&self, agent: &str, outcome: RunOutcome, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent) {
            let metrics = &mut state.metrics;
            metrics.active = metrics.active.saturating_sub(1);
            metrics.total_duration_ms += duration_ms;
            match outcome {
                RunOutcome::Completed => metrics.completed += 1,
                RunOutcome::Failed => metrics.failed += 1,
                RunOutcome::Cancelled => metrics.cancelled += 1,
            }
            state.status = if metrics.active > 0 {
                WorkerStatus::Working
            } else if outcome == RunOutcome::Failed {
                WorkerStatus::Error
            } else {
                WorkerStatus::Idle
            };
        }
    }

    /// Get a snapshot of all agent states, sorted by agent name.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut snapshot: Vec<AgentState> = states.values().cloned().collect();
        snapshot.sort_by(|a, b| a.agent.cmp(&b.agent));
        snapshot
    }

    /// Current state of one agent, if it has ever run.
    pub async fn get_state(&self, agent: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.runs += state.metrics.runs;
            total.completed += state.metrics.completed;
            total.failed += state.metrics.failed;
            total.cancelled += state.metrics.cancelled;
            total.active += state.metrics.active;
            total.total_duration_ms += state.metrics.total_duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
