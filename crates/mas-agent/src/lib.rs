//! Agent contract and registry for the MAS orchestrator.
//!
//! An agent is an addressable unit exposing one blocking operation,
//! [`Agent::process`], which runs under a cancellable [`ExecutionContext`].
//! The orchestrator looks agents up by name through an [`AgentRegistry`].
//!
//! # Main types
//!
//! - [`Agent`]: Trait every agent implements.
//! - [`ExecutionContext`]: Task id, chain position, and cancellation token for one call.
//! - [`AgentRegistry`]: Thread-safe name → agent mapping that rejects duplicates.
//! - [`EchoAgent`], [`DelayAgent`], [`FailingAgent`], [`FnAgent`]: Built-in agents.

/// The agent trait and its execution context.
pub mod agent;
/// Built-in agents used by the CLI and tests.
pub mod builtin;
/// Name-keyed agent registry.
pub mod registry;

pub use agent::{Agent, ExecutionContext};
pub use builtin::{register_builtins, DelayAgent, EchoAgent, FailingAgent, FnAgent};
pub use registry::AgentRegistry;
