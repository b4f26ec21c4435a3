use chrono::{DateTime, Utc};
use mas_core::Payload;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in its lifecycle.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`; the last three are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (
                    TaskStatus::Running,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
                )
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Work submitted by a caller: the agents to run, in order, and their input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub input: Payload,
}

impl TaskRequest {
    /// A request chaining `agent_ids` in order.
    pub fn new<I, S>(agent_ids: I, input: Payload) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent_ids: agent_ids.into_iter().map(Into::into).collect(),
            input,
        }
    }

    /// A request addressed to exactly one agent.
    pub fn single(agent_id: impl Into<String>, input: Payload) -> Self {
        Self {
            agent_ids: vec![agent_id.into()],
            input,
        }
    }
}

/// Snapshot of a tracked task.
///
/// `result` is set only when `status == Completed`; `error` only when the task
/// ended `Failed` or `Cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub agent_ids: Vec<String>,
    pub input: Payload,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh `Pending` task built from `request`.
    pub fn new(request: TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_ids: request.agent_ids,
            input: request.input,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the task has reached a final status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate task counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskSummary {
    pub(crate) fn record(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}
