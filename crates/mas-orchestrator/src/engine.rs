use crate::config::OrchestratorConfig;
use crate::dispatcher::Dispatcher;
use crate::janitor::Janitor;
use crate::monitor::AgentMonitor;
use crate::store::{CancelOutcome, TaskStore};
use crate::types::{Task, TaskRequest, TaskSummary};
use mas_agent::{Agent, AgentRegistry};
use mas_core::{MasError, MasResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// State that exists only while the orchestrator is started.
struct Lifecycle {
    /// Runtime that execution units are spawned on.
    runtime: Handle,
    shutdown: CancellationToken,
    _janitor: JoinHandle<()>,
}

/// The orchestrator facade.
///
/// Owns the agent registry, the task store, and the janitor. Tasks are only
/// accepted between [`start`](Self::start) and [`stop`](Self::stop).
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    store: Arc<TaskStore>,
    monitor: Arc<AgentMonitor>,
    dispatcher: Dispatcher,
    /// Submission holds this lock across its running check and the dispatch,
    /// so no task is admitted after `stop()` has cancelled in-flight work.
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Orchestrator {
    /// Create an orchestrator with an empty agent registry.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, Arc::new(AgentRegistry::new()))
    }

    /// Create an orchestrator sharing an existing registry.
    pub fn with_registry(config: OrchestratorConfig, registry: Arc<AgentRegistry>) -> Self {
        let config = config.normalized();
        let store = Arc::new(TaskStore::new());
        let monitor = Arc::new(AgentMonitor::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&monitor),
            config.max_concurrent_tasks,
        );

        Self {
            config,
            registry,
            store,
            monitor,
            dispatcher,
            lifecycle: Mutex::new(None),
        }
    }

    /// Begin accepting tasks and launch the janitor. Idempotent.
    ///
    /// Must be called from within a Tokio runtime; that runtime executes every
    /// task submitted until [`stop`](Self::stop), whichever thread submits it.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            debug!("Orchestrator already running");
            return;
        }

        let runtime = Handle::current();
        let shutdown = CancellationToken::new();
        let janitor = Janitor::new(
            Arc::clone(&self.store),
            self.config.task_ttl(),
            self.config.poll_interval(),
        );
        let _janitor = runtime.spawn(janitor.run(shutdown.clone()));
        *lifecycle = Some(Lifecycle {
            runtime,
            shutdown,
            _janitor,
        });

        info!(
            task_ttl_ms = self.config.task_ttl_ms,
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            "Orchestrator started"
        );
    }

    /// Stop accepting tasks and halt the janitor. Idempotent.
    ///
    /// With `cancel_on_stop`, every in-flight task is asked to cancel.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let Some(state) = lifecycle.take() else {
            debug!("Orchestrator already stopped");
            return;
        };
        state.shutdown.cancel();

        let cancelled = if self.config.cancel_on_stop {
            self.store.cancel_all()
        } else {
            0
        };
        info!(cancelled, "Orchestrator stopped");
    }

    /// Whether the orchestrator is accepting tasks.
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    /// Register an agent under its own name. The first registration of a name wins.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> MasResult<()> {
        let name = agent.name().to_string();
        self.registry.register(name, agent)
    }

    /// Look up a registered agent by name.
    pub fn get_agent(&self, name: &str) -> MasResult<Arc<dyn Agent>> {
        self.registry
            .get(name)
            .ok_or_else(|| MasError::UnknownAgent(vec![name.to_string()]))
    }

    /// Validate and launch a task, returning its id immediately.
    ///
    /// May be called from any thread, inside a runtime or not.
    pub fn submit_task(&self, request: TaskRequest) -> MasResult<Uuid> {
        let lifecycle = self.lifecycle.lock();
        let state = lifecycle.as_ref().ok_or(MasError::NotRunning)?;
        self.dispatcher.dispatch(request, &state.runtime)
    }

    /// Snapshot of a task.
    pub fn get_task(&self, id: Uuid) -> MasResult<Task> {
        self.store.get(id).ok_or(MasError::TaskNotFound)
    }

    /// Request cancellation of a task. Cancelling a finished task does nothing.
    pub fn cancel_task(&self, id: Uuid) -> MasResult<()> {
        match self.store.cancel(id) {
            None => Err(MasError::TaskNotFound),
            Some(CancelOutcome::Requested) => {
                info!(task_id = %id, "Task cancellation requested");
                Ok(())
            }
            Some(outcome) => {
                debug!(task_id = %id, ?outcome, "Cancel had no effect");
                Ok(())
            }
        }
    }

    /// Wait until a task reaches a terminal state and return its final snapshot.
    ///
    /// Fails with [`MasError::TaskNotFound`] if the task is unknown or evicted
    /// while waiting, and with [`MasError::Timeout`] if `timeout` elapses first.
    pub async fn wait_for(&self, id: Uuid, timeout: Duration) -> MasResult<Task> {
        let mut rx = self.store.subscribe(id).ok_or(MasError::TaskNotFound)?;

        let waited = tokio::time::timeout(timeout, rx.wait_for(|status| status.is_terminal()))
            .await
            .map(|settled| settled.is_ok());
        match waited {
            Ok(true) => self.get_task(id),
            Ok(false) => Err(MasError::TaskNotFound),
            Err(_) => Err(MasError::Timeout(format!(
                "task {id} did not finish within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// All tracked tasks, oldest first.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.store.enumerate()
    }

    /// Counts of tracked tasks by status.
    pub fn task_summary(&self) -> TaskSummary {
        self.store.summary()
    }

    /// Run one janitor sweep immediately. Returns the number of evicted tasks.
    pub fn sweep_now(&self) -> usize {
        Janitor::new(
            Arc::clone(&self.store),
            self.config.task_ttl(),
            self.config.poll_interval(),
        )
        .sweep()
    }

    /// The shared agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Per-agent activity and metrics.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// The effective (normalized) configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(state) = self.lifecycle.get_mut().take() {
            state.shutdown.cancel();
        }
    }
}
