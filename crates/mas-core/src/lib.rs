//! Core types and error definitions for the MAS task orchestration crates.
//!
//! This crate provides the foundational types shared across every MAS crate:
//! the unified error enum and the opaque payload that flows between callers,
//! the orchestrator, and agents.
//!
//! # Main types
//!
//! - [`MasError`]: Unified error enum for registry, orchestrator, and agent failures.
//! - [`MasResult`]: Convenience alias for `Result<T, MasError>`.
//! - [`Payload`]: Opaque input/output value handed to and returned by agents.

/// Error types shared by all MAS crates.
pub mod error;

pub use error::{MasError, MasResult};

/// Opaque payload passed into an agent and returned from it.
///
/// The orchestrator never inspects payloads; it only stores and forwards them.
pub type Payload = serde_json::Value;
