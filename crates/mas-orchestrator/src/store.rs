use crate::types::{Task, TaskStatus, TaskSummary};
use chrono::Utc;
use mas_core::Payload;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// A terminal or starting move along the task state machine.
#[derive(Debug, Clone)]
pub enum Transition {
    /// `Pending -> Running`
    Start,
    /// `Running -> Completed` with the final output.
    Complete(Payload),
    /// `Running -> Failed` with a diagnostic.
    Fail(String),
    /// `Running -> Cancelled` with a diagnostic.
    Cancel(String),
}

impl Transition {
    /// Status reached by this transition.
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Start => TaskStatus::Running,
            Transition::Complete(_) => TaskStatus::Completed,
            Transition::Fail(_) => TaskStatus::Failed,
            Transition::Cancel(_) => TaskStatus::Cancelled,
        }
    }
}

/// What a cancellation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task's handle was consumed and its context signalled.
    Requested,
    /// The handle had already been consumed by an earlier request.
    AlreadyRequested,
    /// The task is terminal; nothing was done.
    AlreadyTerminal,
}

struct TaskRecord {
    task: Task,
    /// Consumed at most once.
    cancel: Option<CancellationToken>,
    status_tx: watch::Sender<TaskStatus>,
}

/// Concurrent-safe table of tasks keyed by id.
///
/// Every mutation of a task happens under the table's write lock, so the
/// executing unit and a concurrent cancel never race on a record.
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new task together with its owned cancellation handle.
    ///
    /// Returns `false` and leaves the table untouched if the id is taken.
    pub fn insert(&self, task: Task, cancel: CancellationToken) -> bool {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return false;
        }
        let (status_tx, _) = watch::channel(task.status);
        tasks.insert(
            task.id,
            TaskRecord {
                task,
                cancel: Some(cancel),
                status_tx,
            },
        );
        true
    }

    /// Snapshot of a task.
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().get(&id).map(|r| r.task.clone())
    }

    /// Apply `mutate` to a task under the lock and bump `updated_at`.
    ///
    /// The mutation is discarded as a whole if the task is already terminal,
    /// if it moves `status` along an edge not on the state machine, or if it
    /// touches `result`/`error` without entering a terminal state. Returns the
    /// updated snapshot, or `None` if the task is unknown or the mutation was
    /// rejected.
    pub fn update<F>(&self, id: Uuid, mutate: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write();
        let record = tasks.get_mut(&id)?;

        let previous = record.task.status;
        let mut next = record.task.clone();
        mutate(&mut next);

        if !is_legal_update(&record.task, &next) {
            warn!(
                task_id = %id,
                from = %previous,
                to = %next.status,
                "Rejected illegal task update"
            );
            return None;
        }

        next.updated_at = Utc::now();
        record.task = next;
        if record.task.status != previous {
            record.status_tx.send_replace(record.task.status);
        }
        Some(record.task.clone())
    }

    /// Move a task along the state machine, writing `result`/`error` in the
    /// same critical section as the status change.
    pub fn transition(&self, id: Uuid, transition: Transition) -> Option<Task> {
        self.update(id, |task| {
            task.status = transition.target();
            match transition {
                Transition::Start => {}
                Transition::Complete(output) => task.result = Some(output),
                Transition::Fail(message) | Transition::Cancel(message) => {
                    task.error = Some(message);
                }
            }
        })
    }

    /// Consume the task's cancellation handle, signalling its execution context.
    ///
    /// Returns `None` if the task is unknown.
    pub fn cancel(&self, id: Uuid) -> Option<CancelOutcome> {
        let mut tasks = self.tasks.write();
        let record = tasks.get_mut(&id)?;
        if record.task.is_terminal() {
            return Some(CancelOutcome::AlreadyTerminal);
        }
        Some(match record.cancel.take() {
            Some(token) => {
                token.cancel();
                CancelOutcome::Requested
            }
            None => CancelOutcome::AlreadyRequested,
        })
    }

    /// Request cancellation of every non-terminal task. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.tasks.write();
        let mut count = 0;
        for record in tasks.values_mut() {
            if record.task.is_terminal() {
                continue;
            }
            if let Some(token) = record.cancel.take() {
                token.cancel();
                count += 1;
            }
        }
        count
    }

    /// Receiver observing every status change of a task.
    pub fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<TaskStatus>> {
        self.tasks.read().get(&id).map(|r| r.status_tx.subscribe())
    }

    /// Snapshot of all tasks in creation-time order.
    pub fn enumerate(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().values().map(|r| r.task.clone()).collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Remove a task unconditionally.
    pub fn delete(&self, id: Uuid) -> Option<Task> {
        self.tasks.write().remove(&id).map(|r| r.task)
    }

    /// Delete a task only if `predicate` holds for it at the moment of deletion.
    pub fn delete_if<P>(&self, id: Uuid, predicate: P) -> Option<Task>
    where
        P: FnOnce(&Task) -> bool,
    {
        let mut tasks = self.tasks.write();
        if !tasks.get(&id).is_some_and(|r| predicate(&r.task)) {
            return None;
        }
        tasks.remove(&id).map(|r| r.task)
    }

    /// Counts of stored tasks by status.
    pub fn summary(&self) -> TaskSummary {
        let tasks = self.tasks.read();
        let mut summary = TaskSummary::default();
        for record in tasks.values() {
            summary.record(record.task.status);
        }
        summary
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

/// `result` and `error` are written once, together with the terminal
/// transition, and never both.
fn is_legal_update(current: &Task, next: &Task) -> bool {
    if current.is_terminal() || next.id != current.id {
        return false;
    }
    if next.status != current.status && !current.status.can_transition_to(next.status) {
        return false;
    }
    let outcome_changed = next.result != current.result || next.error != current.error;
    let finishing = next.status != current.status && next.status.is_terminal();
    if outcome_changed && !finishing {
        return false;
    }
    !(next.result.is_some() && next.error.is_some())
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
