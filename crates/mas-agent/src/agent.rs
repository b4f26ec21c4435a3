use async_trait::async_trait;
use mas_core::{MasResult, Payload};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call context handed to [`Agent::process`].
///
/// Cloning is cheap; clones share the same cancellation token.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: Uuid,
    step: usize,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Context for one invocation within task `task_id`.
    pub fn new(task_id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            step: 0,
            cancel,
        }
    }

    /// A context bound to no task, with a fresh token nobody else holds.
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), CancellationToken::new())
    }

    /// Position of the agent inside a multi-agent chain (0 = first).
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    /// Id of the task this invocation belongs to.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Position of the agent within the task's chain.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The underlying cancellation token.
    ///
    /// Inside the orchestrator this is a child of the task's own token, so
    /// cancelling it does not cancel the task.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// An addressable unit of work.
///
/// `process` should observe [`ExecutionContext::cancelled`] and return
/// promptly (typically with [`mas_core::MasError::Cancelled`]) once the
/// context is cancelled. The orchestrator never aborts a running call.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name the agent is registered under.
    fn name(&self) -> &str;

    /// Handle one input and return its output.
    async fn process(&self, ctx: &ExecutionContext, input: Payload) -> MasResult<Payload>;
}
