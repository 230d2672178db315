//! Task delegation to registered workers.
//!
//! Every dispatch starts with a knowledge search for the task's role and
//! content; the references found (possibly none) travel with the request.
//! Each attempt runs under the task deadline. Timeouts and transport errors
//! are retried with exponential backoff; a worker's own `failed` answer is
//! final. Fan-out dispatch joins every branch before returning.

pub mod process;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use phasegate_common::KnowledgeRepository;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DelegationConfig;
use crate::errors::DelegationError;
use crate::model::{ResultStatus, Task, TaskResult};
use crate::registry::WorkerRegistry;
use crate::rollback::PlaceholderDetector;

pub use process::{ProcessValidator, ProcessWorker};

/// Retry policy for a single task.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DelegationConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DelegationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Decision returned by the fan-out observer for each finished branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    Continue,
    /// Cancel every branch still running; their results are discarded.
    Cancel,
}

pub struct TaskDelegator {
    registry: Arc<WorkerRegistry>,
    knowledge: Arc<dyn KnowledgeRepository>,
    detector: Arc<PlaceholderDetector>,
    retry: RetryPolicy,
}

impl TaskDelegator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        knowledge: Arc<dyn KnowledgeRepository>,
        detector: Arc<PlaceholderDetector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            knowledge,
            detector,
            retry,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Dispatch one task and wait for its terminal result.
    pub async fn delegate(&self, task: &Task, cancel: &CancellationToken) -> Result<TaskResult, DelegationError> {
        let context_refs = self
            .knowledge
            .search(&task.role, &task.content)
            .await
            .map_err(|source| DelegationError::Knowledge {
                role: task.role.clone(),
                source,
            })?;
        let entry = self.registry.resolve(&task.role, &task.task_type)?;
        let deadline = entry
            .descriptor
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(task.deadline);
        let request = task.to_request(context_refs);
        let started_at = Utc::now();
        let permits = entry.permits();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskResult::cancelled(task, attempt - 1, started_at)),
                permit = Arc::clone(&permits).acquire_owned() => permit,
            };
            let Ok(guard) = permit else {
                return Ok(TaskResult::worker_error(task, "worker pool closed", attempt, started_at));
            };

            debug!(task = %task.key, role = %task.role, attempt, "dispatching task");
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskResult::cancelled(task, attempt, started_at)),
                outcome = tokio::time::timeout(deadline, entry.worker.execute(request.clone(), cancel.child_token())) => outcome,
            };
            drop(guard);

            match outcome {
                Ok(Ok(response)) if response.task_id == task.id => {
                    if cancel.is_cancelled() {
                        return Ok(TaskResult::cancelled(task, attempt, started_at));
                    }
                    let mut result = TaskResult::from_response(task, response, attempt, started_at);
                    self.detector.assess(&mut result);
                    if result.is_suspect() {
                        warn!(task = %task.key, findings = ?result.findings, "worker returned suspect content");
                    }
                    return Ok(result);
                }
                Ok(Ok(response)) => {
                    warn!(task = %task.key, got = %response.task_id, attempt, "response for a different task id");
                    if attempt >= self.retry.max_attempts {
                        let message = format!("worker answered for task {}", response.task_id);
                        return Ok(TaskResult::worker_error(task, message, attempt, started_at));
                    }
                }
                Ok(Err(e)) => {
                    warn!(task = %task.key, attempt, error = %e, "worker error");
                    if attempt >= self.retry.max_attempts {
                        return Ok(TaskResult::worker_error(task, format!("{e:#}"), attempt, started_at));
                    }
                }
                Err(_) => {
                    warn!(task = %task.key, attempt, deadline_ms = deadline.as_millis() as u64, "task timed out");
                    if attempt >= self.retry.max_attempts {
                        return Ok(TaskResult::timed_out(task, attempt, started_at));
                    }
                }
            }

            let backoff = self.retry.backoff_for(attempt);
            debug!(task = %task.key, backoff_ms = backoff.as_millis() as u64, "backing off before retry");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskResult::cancelled(task, attempt, started_at)),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Dispatch all tasks concurrently and join every branch.
    ///
    /// `on_result` sees each result as it lands. Returning [`FanOut::Cancel`]
    /// cancels `cancel`; branches still running end as `cancelled`, and any
    /// output that arrives afterwards is discarded. Results are returned in
    /// the order of `tasks`.
    pub async fn delegate_parallel<F>(
        &self,
        tasks: &[Task],
        cancel: &CancellationToken,
        mut on_result: F,
    ) -> Result<Vec<TaskResult>, DelegationError>
    where
        F: FnMut(&Task, &TaskResult) -> FanOut,
    {
        let mut pending: FuturesUnordered<_> = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| async move { (i, self.delegate(task, cancel).await) })
            .collect();

        let mut slots: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        let mut first_error = None;

        while let Some((i, outcome)) = pending.next().await {
            match outcome {
                Ok(mut result) => {
                    if cancel.is_cancelled() {
                        if result.status != ResultStatus::Cancelled {
                            debug!(task = %tasks[i].key, "discarding result that arrived after cancellation");
                            result.discard();
                        }
                    } else if on_result(&tasks[i], &result) == FanOut::Cancel {
                        info!(task = %tasks[i].key, "cancelling remaining fan-out tasks");
                        cancel.cancel();
                    }
                    slots[i] = Some(result);
                }
                Err(e) => {
                    warn!(task = %tasks[i].key, error = %e, "task could not be dispatched");
                    cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}
