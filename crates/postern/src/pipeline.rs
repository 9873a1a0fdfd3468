//! Task chain execution.
//!
//! A request passes through three chains: pre-integration, integration and
//! post-integration. Tasks in a chain run strictly in order. A task either
//! lets the chain continue or answers the request, which stops its chain.

use async_trait::async_trait;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::event::GatewayResponse;

/// What a task tells the chain.
#[derive(Debug)]
pub enum ChainSignal {
    /// Run the next task.
    Continue,
    /// The request is answered; stop this chain.
    Done(GatewayResponse),
}

/// One step of a chain.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError>;
}

/// Which chain a task list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreIntegration,
    Integration,
    PostIntegration,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PreIntegration => "pre-integration",
            Phase::Integration => "integration",
            Phase::PostIntegration => "post-integration",
        }
    }
}

/// How a chain finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every task ran.
    Completed,
    /// The named task answered the request.
    ShortCircuited(&'static str),
}

/// An ordered list of tasks for one phase.
pub struct Chain {
    phase: Phase,
    tasks: Vec<Box<dyn Task>>,
}

impl Chain {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            tasks: Vec::new(),
        }
    }

    /// Append a task.
    pub fn with(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Run the tasks in order. The first error aborts the chain.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<ChainOutcome, GatewayError> {
        for task in &self.tasks {
            debug!(phase = self.phase.as_str(), task = task.name(), "running task");
            match task.run(ctx).await? {
                ChainSignal::Continue => {}
                ChainSignal::Done(response) => {
                    debug!(
                        phase = self.phase.as_str(),
                        task = task.name(),
                        status = response.status,
                        "task answered the request"
                    );
                    ctx.answer(response)?;
                    return Ok(ChainOutcome::ShortCircuited(task.name()));
                }
            }
        }
        Ok(ChainOutcome::Completed)
    }
}
