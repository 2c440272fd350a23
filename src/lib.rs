pub mod connection;
pub mod context;
pub mod cycle_check;
pub mod engine;
pub mod graph;
pub mod quality;
pub mod retry;
pub mod stage;
pub mod task;
pub mod transform;

pub use connection::{
    ConnectionProvider, CredentialProvider, Credentials, Providers, StaticConnections,
    StaticCredentials, Warehouse,
};
pub use context::RunContext;
pub use cycle_check::has_cycle;
pub use engine::{Engine, RunResult};
pub use graph::Graph;
pub use quality::{QualityCheckConfig, QualityFailure};
pub use retry::{RetryExecutor, RetryPolicy};
pub use stage::StageConfig;
pub use task::{Operation, Task, TaskState};
pub use transform::{TableRole, TransformConfig};

pub use tokio_util::sync::CancellationToken;

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Key/value output produced by a successful task, keyed by whatever the
/// operation chooses to report (row counts, resolved paths, per-table counts).
pub type TaskOutput = HashMap<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum WharfError {
    #[error("task graph contains a cycle")]
    Cycle,
    #[error("task `{task}` depends on unknown task `{upstream}`")]
    UnknownDependency { task: String, upstream: String },
    #[error("duplicate task name `{0}`")]
    DuplicateTask(String),
    #[error("unknown connection id `{0}`")]
    UnknownConnection(String),
    #[error("unknown credential id `{0}`")]
    UnknownCredential(String),
    #[error("transfer into `{table}` failed: {detail}")]
    Transfer { table: String, detail: String },
    #[error("load into `{table}` failed: {message}")]
    Load { table: String, message: String },
    #[error("data quality check failed on table `{table}`: {reason}")]
    Quality {
        table: String,
        reason: QualityFailure,
    },
    #[error("unresolved placeholder `{{{0}}}` in path template")]
    UnresolvedPlaceholder(String),
    #[error("warehouse error: {0}")]
    Warehouse(String),
    #[error("task `{task}` timed out after {after:?}")]
    Timeout { task: String, after: Duration },
    #[error("task `{task}` failed after {attempts} attempts: {source}")]
    RetryExhausted {
        task: String,
        attempts: u32,
        #[source]
        source: Box<WharfError>,
    },
    #[error("run cancelled")]
    Cancelled,
    #[error("internal engine error: {0}")]
    Internal(String),
}
