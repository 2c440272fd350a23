use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::Providers;
use crate::context::RunContext;
use crate::retry::RetryPolicy;
use crate::{TaskOutput, WharfError, quality, stage, transform};

/// Execution state of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Skipped,
}

/// The operation a task performs, dispatched by the engine through a single
/// `execute` entry point.
#[derive(Debug, Clone)]
pub enum Operation {
    Stage(stage::StageConfig),
    Transform(transform::TransformConfig),
    QualityCheck(quality::QualityCheckConfig),
}

impl Operation {
    pub async fn execute(
        &self,
        providers: &Providers,
        rctx: &RunContext,
    ) -> Result<TaskOutput, WharfError> {
        match self {
            Operation::Stage(cfg) => stage::run(cfg, providers, rctx).await,
            Operation::Transform(cfg) => transform::run(cfg, providers).await,
            Operation::QualityCheck(cfg) => quality::run(cfg, providers).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Stage(_) => "stage",
            Operation::Transform(_) => "transform",
            Operation::QualityCheck(_) => "quality_check",
        }
    }
}

/// A named node in the task graph. Topology (the upstream set) is fixed at
/// build time; execution state lives in the engine's `RunResult`.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    upstream: Vec<String>,
    operation: Operation,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

impl Task {
    pub fn new(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            upstream: Vec::new(),
            operation,
            retry: None,
            timeout: None,
        }
    }

    /// Declares upstream tasks that must reach `Success` before this one runs.
    pub fn after<I, S>(mut self, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upstream.extend(upstream.into_iter().map(Into::into));
        self
    }

    /// Overrides the engine's default retry policy for this task.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Overrides the engine's default timeout for this task.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstream(&self) -> &[String] {
        &self.upstream
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
