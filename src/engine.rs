use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Providers;
use crate::context::RunContext;
use crate::graph::Graph;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::task::{Task, TaskState};
use crate::{TaskOutput, WharfError};

enum WorkerEvent {
    Retrying { task: String, attempt: u32 },
    Done {
        task: String,
        outcome: Result<TaskOutput, WharfError>,
    },
}

/// Outcome of one graph execution: terminal state and output per task, the
/// causing error for every failed task, and the name of the first failure.
/// Together these make a post-mortem possible without re-running.
#[derive(Debug)]
pub struct RunResult {
    pub states: HashMap<String, TaskState>,
    pub outputs: HashMap<String, TaskOutput>,
    pub errors: HashMap<String, WharfError>,
    pub first_failed: Option<String>,
    pub execution_order: Vec<String>,
    /// Every state change the scheduler applied, in order. Intermediate
    /// states (`Running`, `Retrying`) show up here even though `states`
    /// only keeps the last one per task.
    pub transitions: Vec<(String, TaskState)>,
    pub cancelled: bool,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.states.values().all(|s| *s == TaskState::Success)
    }

    pub fn state(&self, task: &str) -> Option<TaskState> {
        self.states.get(task).copied()
    }

    pub fn output(&self, task: &str) -> Option<&TaskOutput> {
        self.outputs.get(task)
    }

    /// Skipped task names, sorted.
    pub fn skipped(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .states
            .iter()
            .filter(|(_, state)| **state == TaskState::Skipped)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// The task graph engine. Dispatches eligible tasks concurrently, applies
/// retry and timeout per task, and on permanent failure skips every
/// transitive descendant without invoking it.
pub struct Engine {
    providers: Providers,
    default_retry: Option<RetryPolicy>,
    default_timeout: Option<Duration>,
    max_parallelism: usize,
}

impl Engine {
    pub fn new(providers: Providers) -> Self {
        Self {
            providers,
            default_retry: None,
            default_timeout: None,
            max_parallelism: 64,
        }
    }

    /// Retry policy applied to tasks that do not declare their own.
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    /// Timeout applied to tasks that do not declare their own. A timed-out
    /// task is treated as failed for propagation purposes.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = limit.max(1);
        self
    }

    /// Executes the graph. A task becomes eligible once all its upstream
    /// tasks reached `Success`; independent tasks run concurrently up to the
    /// parallelism limit. Task failures are recorded in the result, never
    /// returned as `Err`; `Err` is reserved for engine-internal faults.
    ///
    /// Cancelling `cancel` stops dispatching pending tasks while letting
    /// in-flight tasks finish or time out; never-dispatched tasks stay
    /// `Pending` in the result.
    pub async fn run(
        &self,
        graph: &Graph,
        rctx: &RunContext,
        cancel: CancellationToken,
    ) -> Result<RunResult, WharfError> {
        let mut states: HashMap<String, TaskState> = graph
            .tasks()
            .keys()
            .map(|name| (name.clone(), TaskState::Pending))
            .collect();
        let mut outputs: HashMap<String, TaskOutput> = HashMap::new();
        let mut errors: HashMap<String, WharfError> = HashMap::new();
        let mut first_failed: Option<String> = None;
        let mut transitions: Vec<(String, TaskState)> = Vec::new();
        let execution_order = Arc::new(Mutex::new(Vec::new()));

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let mut in_degrees = graph.in_degrees();
        for (name, &degree) in &in_degrees {
            if degree == 0 {
                ready_tx
                    .send(name.clone())
                    .map_err(|_| WharfError::Internal("ready queue closed".into()))?;
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut remaining = graph.len();
        let mut in_flight = 0usize;
        let mut cancelled = false;

        while remaining > 0 && !(cancelled && in_flight == 0) {
            // Biased so cancellation is observed before dispatch and finished
            // work is drained before new work starts.
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancelled => {
                    info!("cancellation requested; no further tasks will be dispatched");
                    cancelled = true;
                }

                Some(event) = event_rx.recv() => match event {
                    WorkerEvent::Retrying { task, attempt } => {
                        debug!(task = %task, attempt, "task re-entering execution after backoff");
                        transitions.push((task.clone(), TaskState::Retrying));
                        states.insert(task, TaskState::Retrying);
                    }
                    WorkerEvent::Done { task, outcome } => {
                        in_flight -= 1;
                        remaining -= 1;
                        match outcome {
                            Ok(output) => {
                                states.insert(task.clone(), TaskState::Success);
                                transitions.push((task.clone(), TaskState::Success));
                                outputs.insert(task.clone(), output);
                                for child in graph.dependents_of(&task) {
                                    if let Some(degree) = in_degrees.get_mut(child) {
                                        *degree -= 1;
                                        if *degree == 0
                                            && states.get(child) == Some(&TaskState::Pending)
                                            && !cancelled
                                        {
                                            ready_tx
                                                .send(child.clone())
                                                .map_err(|_| WharfError::Internal("ready queue closed".into()))?;
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(task = %task, error = %err, "task failed permanently");
                                states.insert(task.clone(), TaskState::Failed);
                                transitions.push((task.clone(), TaskState::Failed));
                                if first_failed.is_none() {
                                    first_failed = Some(task.clone());
                                }
                                errors.insert(task.clone(), err);
                                for name in graph.descendants(&task) {
                                    if states.get(&name) == Some(&TaskState::Pending) {
                                        debug!(task = %name, cause = %task, "skipping downstream task");
                                        transitions.push((name.clone(), TaskState::Skipped));
                                        states.insert(name, TaskState::Skipped);
                                        remaining -= 1;
                                    }
                                }
                            }
                        }
                    }
                },

                Some(name) = ready_rx.recv(), if !cancelled => {
                    if states.get(&name) != Some(&TaskState::Pending) {
                        continue;
                    }
                    let task = graph
                        .task(&name)
                        .cloned()
                        .ok_or_else(|| WharfError::Internal(format!("dispatched unknown task `{name}`")))?;
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| WharfError::Internal("worker pool closed".into()))?;

                    debug!(task = %name, kind = task.operation().kind(), "dispatching task");
                    states.insert(name.clone(), TaskState::Running);
                    transitions.push((name.clone(), TaskState::Running));
                    in_flight += 1;
                    handles.push(self.spawn_task(
                        task,
                        rctx.clone(),
                        cancel.clone(),
                        event_tx.clone(),
                        Arc::clone(&execution_order),
                        permit,
                    ));
                }
            }
        }

        for joined in join_all(handles).await {
            joined.map_err(|err| WharfError::Internal(format!("worker join failed: {err}")))?;
        }

        let execution_order = execution_order.lock().await.clone();
        Ok(RunResult {
            states,
            outputs,
            errors,
            first_failed,
            execution_order,
            transitions,
            cancelled,
        })
    }

    fn spawn_task(
        &self,
        task: Arc<Task>,
        rctx: RunContext,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<WorkerEvent>,
        execution_order: Arc<Mutex<Vec<String>>>,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> JoinHandle<()> {
        let providers = self.providers.clone();
        let policy = task
            .retry_policy()
            .cloned()
            .or_else(|| self.default_retry.clone());
        let task_timeout = task.timeout().or(self.default_timeout);
        let name = task.name().to_string();

        tokio::spawn(async move {
            let _permit = permit;
            let retry = RetryExecutor::new(policy);

            let attempt_events = events.clone();
            let work = retry.run(cancel.clone(), &name, |attempt| {
                let task = Arc::clone(&task);
                let providers = providers.clone();
                let rctx = rctx.clone();
                let name = name.clone();
                let events = attempt_events.clone();
                async move {
                    if attempt > 1 {
                        let _ = events.send(WorkerEvent::Retrying {
                            task: name,
                            attempt,
                        });
                    }
                    task.operation().execute(&providers, &rctx).await
                }
            });

            let outcome = match task_timeout {
                Some(after) => match timeout(after, work).await {
                    Ok(result) => result,
                    Err(_) => Err(WharfError::Timeout {
                        task: name.clone(),
                        after,
                    }),
                },
                None => work.await,
            };

            if outcome.is_ok() {
                execution_order.lock().await.push(name.clone());
            }
            let _ = events.send(WorkerEvent::Done {
                task: name,
                outcome,
            });
        })
    }
}
