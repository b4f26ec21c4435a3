use crate::agent::{Agent, ExecutionContext};
use crate::registry::AgentRegistry;
use async_trait::async_trait;
use mas_core::{MasError, MasResult, Payload};
use std::sync::Arc;
use std::time::Duration;

/// Returns its input unchanged.
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    /// Create an echo agent named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &ExecutionContext, input: Payload) -> MasResult<Payload> {
        Ok(input)
    }
}

/// Waits for a fixed delay, then returns its input.
///
/// Cancellation during the wait makes it return [`MasError::Cancelled`].
pub struct DelayAgent {
    name: String,
    delay: Duration,
}

impl DelayAgent {
    /// Create an agent that waits `delay` before echoing its input.
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Agent for DelayAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: &ExecutionContext, input: Payload) -> MasResult<Payload> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(input),
            _ = ctx.cancelled() => Err(MasError::Cancelled),
        }
    }
}

/// Always fails with the configured message.
pub struct FailingAgent {
    name: String,
    message: String,
}

impl FailingAgent {
    /// Create an agent that always fails with `message`.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &ExecutionContext, _input: Payload) -> MasResult<Payload> {
        Err(MasError::agent(self.message.clone()))
    }
}

type AgentFn = dyn Fn(Payload) -> MasResult<Payload> + Send + Sync;

/// Wraps a synchronous closure as an agent.
pub struct FnAgent {
    name: String,
    func: Box<AgentFn>,
}

impl FnAgent {
    /// Wrap `func` as an agent named `name`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Payload) -> MasResult<Payload> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: &ExecutionContext, input: Payload) -> MasResult<Payload> {
        if ctx.is_cancelled() {
            return Err(MasError::Cancelled);
        }
        (self.func)(input)
    }
}

fn text_of(input: &Payload) -> String {
    match input {
        Payload::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Register the standard set of built-in agents:
/// `echo`, `upper`, `reverse`, `fail`, and `sleep` (one second).
pub fn register_builtins(registry: &AgentRegistry) -> MasResult<()> {
    registry.register("echo", Arc::new(EchoAgent::new("echo")))?;
    registry.register(
        "upper",
        Arc::new(FnAgent::new("upper", |input| {
            Ok(Payload::String(text_of(&input).to_uppercase()))
        })),
    )?;
    registry.register(
        "reverse",
        Arc::new(FnAgent::new("reverse", |input| {
            Ok(Payload::String(text_of(&input).chars().rev().collect()))
        })),
    )?;
    registry.register(
        "fail",
        Arc::new(FailingAgent::new("fail", "fail agent failed")),
    )?;
    registry.register(
        "sleep",
        Arc::new(DelayAgent::new("sleep", Duration::from_secs(1))),
    )?;
    Ok(())
}
