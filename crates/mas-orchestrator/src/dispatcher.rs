use crate::monitor::{AgentMonitor, RunOutcome};
use crate::store::{TaskStore, Transition};
use crate::types::{Task, TaskRequest};
use futures_util::FutureExt;
use mas_agent::{Agent, AgentRegistry, ExecutionContext};
use mas_core::{MasError, MasResult, Payload};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Admits submitted tasks and launches one execution unit per task.
///
/// Agents named by a task are chained: each receives the previous agent's
/// output, and the last output becomes the task's result. The first failure
/// ends the task as `Failed`.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    monitor: Arc<AgentMonitor>,
    limiter: Option<Arc<Semaphore>>,
}

enum ChainOutcome {
    Completed(Payload),
    Failed(String),
    Cancelled(Option<String>),
}

impl Dispatcher {
    /// `max_concurrent` bounds the number of running tasks; 0 means unbounded.
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        monitor: Arc<AgentMonitor>,
        max_concurrent: usize,
    ) -> Self {
        let limiter = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self {
            store,
            registry,
            monitor,
            limiter,
        }
    }

    /// Validate `request`, store it as `Pending`, and launch its execution unit
    /// on `runtime`.
    ///
    /// Returns as soon as the unit is spawned. The caller does not need to be
    /// inside a runtime itself.
    pub fn dispatch(&self, request: TaskRequest, runtime: &Handle) -> MasResult<Uuid> {
        if request.agent_ids.is_empty() {
            return Err(MasError::InvalidTask(
                "task must name at least one agent".to_string(),
            ));
        }

        let missing = self.registry.missing(&request.agent_ids);
        if !missing.is_empty() {
            return Err(MasError::UnknownAgent(missing));
        }

        // Resolve agents at admission so a later registry change cannot
        // strand a stored task.
        let agents: Vec<Arc<dyn Agent>> = request
            .agent_ids
            .iter()
            .map(|name| {
                self.registry
                    .get(name)
                    .ok_or_else(|| MasError::UnknownAgent(vec![name.clone()]))
            })
            .collect::<MasResult<_>>()?;

        let task = Task::new(request);
        let id = task.id;
        let input = task.input.clone();
        let cancel = CancellationToken::new();

        if !self.store.insert(task, cancel.clone()) {
            return Err(MasError::InvalidTask(format!("task id {id} already exists")));
        }
        info!(task_id = %id, agents = agents.len(), "Task submitted");

        let unit = self.clone();
        runtime.spawn(async move {
            unit.execute(id, agents, input, cancel).await;
        });

        Ok(id)
    }

    /// Drive one task from `Pending` to a terminal state.
    async fn execute(
        &self,
        id: Uuid,
        agents: Vec<Arc<dyn Agent>>,
        input: Payload,
        cancel: CancellationToken,
    ) {
        let _permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(limiter).acquire_owned() => permit.ok(),
            },
            None => None,
        };

        if self.store.transition(id, Transition::Start).is_none() {
            debug!(task_id = %id, "Task vanished before it started");
            return;
        }
        info!(task_id = %id, "Task running");

        let outcome = if cancel.is_cancelled() {
            ChainOutcome::Cancelled(None)
        } else {
            self.run_chain(id, &agents, input, &cancel).await
        };

        let transition = match outcome {
            ChainOutcome::Completed(output) => {
                info!(task_id = %id, "Task completed");
                Transition::Complete(output)
            }
            ChainOutcome::Failed(message) => {
                warn!(task_id = %id, error = %message, "Task failed");
                Transition::Fail(message)
            }
            ChainOutcome::Cancelled(detail) => {
                info!(task_id = %id, "Task cancelled");
                Transition::Cancel(match detail {
                    Some(detail) => format!("task cancelled: {detail}"),
                    None => "task cancelled".to_string(),
                })
            }
        };

        if self.store.transition(id, transition).is_none() {
            debug!(task_id = %id, "Task removed before its outcome was recorded");
        }
    }

    async fn run_chain(
        &self,
        id: Uuid,
        agents: &[Arc<dyn Agent>],
        input: Payload,
        cancel: &CancellationToken,
    ) -> ChainOutcome {
        let mut current = input;

        for (step, agent) in agents.iter().enumerate() {
            if cancel.is_cancelled() {
                return ChainOutcome::Cancelled(None);
            }

            let name = agent.name().to_string();
            // Agents observe a child token: they see cancellation but cannot request it.
            let ctx = ExecutionContext::new(id, cancel.child_token()).with_step(step);
            debug!(task_id = %id, agent = %name, step, "Invoking agent");

            self.monitor.start_run(&name).await;
            let started = Instant::now();
            let result = AssertUnwindSafe(agent.process(&ctx, current))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(MasError::agent(format!(
                        "agent panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if cancel.is_cancelled() {
                self.monitor
                    .finish_run(&name, RunOutcome::Cancelled, elapsed_ms)
                    .await;
                let detail = match result {
                    Err(e) if !e.is_cancelled() => Some(e.to_string()),
                    _ => None,
                };
                return ChainOutcome::Cancelled(detail);
            }

            match result {
                Ok(output) => {
                    self.monitor
                        .finish_run(&name, RunOutcome::Completed, elapsed_ms)
                        .await;
                    current = output;
                }
                Err(e) => {
                    self.monitor
                        .finish_run(&name, RunOutcome::Failed, elapsed_ms)
                        .await;
                    return ChainOutcome::Failed(format!("agent '{name}': {e}"));
                }
            }
        }

        ChainOutcome::Completed(current)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
