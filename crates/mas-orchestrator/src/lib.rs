//! Task orchestration core for multi-agent systems.
//!
//! Callers register named agents, submit tasks addressed to one or more of
//! them, and observe each task as it moves through its lifecycle. Every task
//! runs in its own execution unit with an owned cancellation handle; a
//! background janitor evicts finished tasks once their retention expires.
//!
//! # Main types
//!
//! - [`Orchestrator`]: facade owning the registry, the task store, and the janitor.
//! - [`TaskStore`]: concurrent-safe task table enforcing the status state machine.
//! - [`Dispatcher`]: admits tasks and drives each one through its agents.
//! - [`Janitor`]: periodic eviction of expired terminal tasks.
//! - [`AgentMonitor`]: per-agent activity and run metrics.
//! - [`OrchestratorConfig`]: retention, sweep interval, and admission limits.

/// Orchestrator configuration and TOML loading.
pub mod config;
/// Task admission and per-task execution units.
pub mod dispatcher;
/// The orchestrator facade.
pub mod engine;
/// Expired task eviction.
pub mod janitor;
/// Agent activity and metrics monitoring.
pub mod monitor;
/// Concurrent task table.
pub mod store;
/// Shared task types (Task, TaskStatus, TaskRequest, etc.).
pub mod types;

pub use config::OrchestratorConfig;
pub use dispatcher::Dispatcher;
pub use engine::Orchestrator;
pub use janitor::Janitor;
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, RunOutcome, WorkerStatus};
pub use store::{CancelOutcome, TaskStore, Transition};
pub use types::{Task, TaskRequest, TaskStatus, TaskSummary};
