//! # Task Worker
//!
//! Claim loop that locks a bounded batch of eligible tasks, runs each through
//! its registered [`TaskHandler`](super::handler::TaskHandler) and applies the
//! lifecycle transition matching the outcome.
//!
//! ## Outcome Mapping
//!
//! | Handler result                         | Transition                    |
//! |----------------------------------------|-------------------------------|
//! | `Completed`                            | complete                      |
//! | `NextStep` on a multi-step task        | advance to step               |
//! | `NextStep` on a single-step task       | fail (terminal)               |
//! | `Transient`, attempts below the limit  | delay until backoff elapses   |
//! | `Transient`, attempts at the limit     | fail (terminal)               |
//! | `Terminal`                             | fail (terminal)               |
//! | panic                                  | treated as `Transient`        |
//!
//! Mutual exclusion comes from the store's row locks alone; any number of
//! workers, in this process or others, may poll the same store.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{HandlerError, HandlerRegistry, TaskContext, TaskOutcome};
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::{BackoffConfig, WorkerConfig};
use crate::database::TaskStore;
use crate::error::Result;
use crate::metrics;
use crate::models::Task;

/// What happened to one claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Completed,
    StepAdvanced(String),
    Retried { next_execution: DateTime<Utc> },
    Failed(String),
    /// The outcome could not be recorded; the reaper will recover the task
    Abandoned,
}

pub struct TaskWorker {
    worker_id: String,
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    default_retry: RetryPolicy,
    config: WorkerConfig,
}

impl std::fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorker")
            .field("worker_id", &self.worker_id)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskWorker {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        retry: BackoffConfig,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            registry,
            default_retry: RetryPolicy::new(retry),
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll until a shutdown signal arrives. A full batch is followed by an
    /// immediate re-poll; otherwise the loop sleeps for the poll interval.
    /// The task being executed when shutdown arrives is finished first.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            worker_id = %self.worker_id,
            task_types = ?self.registry.task_types(),
            batch_size = self.config.claim_batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting task worker"
        );

        loop {
            let claimed = match self.poll_once().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Claim cycle failed");
                    0
                }
            };

            if claimed >= self.config.claim_batch_size as usize {
                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => continue,
                    _ => break,
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!(worker_id = %self.worker_id, "Task worker stopped");
    }

    /// Claim one batch and execute it. Returns the number of tasks claimed.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll_once(&self) -> Result<usize> {
        let task_types = self.registry.task_types();
        if task_types.is_empty() {
            return Ok(0);
        }

        let tasks = self
            .store
            .claim_tasks(
                &self.worker_id,
                &task_types,
                self.config.claim_batch_size,
                Utc::now(),
            )
            .await?;

        let claimed = tasks.len();
        if claimed == 0 {
            debug!("No eligible tasks");
            return Ok(0);
        }

        debug!(claimed = claimed, "Claimed task batch");
        for task in tasks {
            metrics::tasks_claimed_total().add(1, &metrics::task_type_label(&task.task_type));
            self.execute(task).await;
        }

        Ok(claimed)
    }

    /// Run the handler for a task this worker has claimed and record the outcome.
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn execute(&self, task: Task) -> ExecutionResult {
        let Some(handler) = self.registry.get(&task.task_type) else {
            let reason = format!("no handler registered for task type {}", task.task_type);
            return self.fail(&task, reason, "no_handler", 0).await;
        };

        let ctx = TaskContext::new(task.clone(), self.worker_id.clone());
        let started = Instant::now();
        let result = match AssertUnwindSafe(handler.execute(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::transient(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as i64;

        let outcome_label = match &result {
            Ok(outcome) => outcome.label(),
            Err(err) => err.label(),
        };
        metrics::handler_duration().record(
            elapsed.as_secs_f64() * 1000.0,
            &[
                KeyValue::new("task_type", task.task_type.clone()),
                KeyValue::new("outcome", outcome_label),
            ],
        );

        match result {
            Ok(TaskOutcome::Completed { data }) => {
                let applied = self
                    .store
                    .complete_task(task.id, &self.worker_id, data, elapsed_ms, Utc::now())
                    .await;
                let result = self.record(&task, "complete", applied, ExecutionResult::Completed);
                if result == ExecutionResult::Completed {
                    metrics::tasks_completed_total()
                        .add(1, &metrics::task_type_label(&task.task_type));
                }
                result
            }
            Ok(TaskOutcome::NextStep { step, data }) => {
                if !task.is_multi_step() {
                    let reason = format!("handler requested step {step} for a single-step task");
                    return self.fail(&task, reason, "terminal", elapsed_ms).await;
                }
                let applied = self
                    .store
                    .advance_task_step(task.id, &self.worker_id, &step, data, elapsed_ms, Utc::now())
                    .await;
                let result = self.record(
                    &task,
                    "advance_step",
                    applied,
                    ExecutionResult::StepAdvanced(step),
                );
                if matches!(result, ExecutionResult::StepAdvanced(_)) {
                    metrics::steps_advanced_total()
                        .add(1, &metrics::task_type_label(&task.task_type));
                }
                result
            }
            Err(HandlerError::Terminal(reason)) => {
                self.fail(&task, reason, "terminal", elapsed_ms).await
            }
            Err(HandlerError::Transient { reason, retry_after }) => {
                let policy = handler
                    .retry_policy()
                    .map(RetryPolicy::new)
                    .unwrap_or_else(|| self.default_retry.clone());
                let now = Utc::now();

                match policy.decide(task.execution_attempts, retry_after, now) {
                    RetryDecision::Retry { next_execution } => {
                        debug!(
                            attempt = task.execution_attempts,
                            next_execution = %next_execution,
                            reason = %reason,
                            "Transient failure, requeueing"
                        );
                        let applied = self
                            .store
                            .delay_task(task.id, &self.worker_id, next_execution, elapsed_ms, now)
                            .await;
                        let result = self.record(
                            &task,
                            "delay",
                            applied,
                            ExecutionResult::Retried { next_execution },
                        );
                        if matches!(result, ExecutionResult::Retried { .. }) {
                            metrics::tasks_retried_total()
                                .add(1, &metrics::task_type_label(&task.task_type));
                        }
                        result
                    }
                    RetryDecision::Exhausted => {
                        let reason = format!(
                            "attempts exhausted after {} tries: {reason}",
                            task.execution_attempts
                        );
                        self.fail(&task, reason, "attempts_exhausted", elapsed_ms)
                            .await
                    }
                }
            }
        }
    }

    async fn fail(
        &self,
        task: &Task,
        reason: String,
        metric_reason: &'static str,
        elapsed_ms: i64,
    ) -> ExecutionResult {
        warn!(
            task_id = %task.id,
            task_type = %task.task_type,
            attempt = task.execution_attempts,
            reason = %reason,
            "Task failed"
        );
        let applied = self
            .store
            .fail_task(task.id, &self.worker_id, &reason, elapsed_ms, Utc::now())
            .await;
        let result = self.record(task, "fail", applied, ExecutionResult::Failed(reason));
        if matches!(result, ExecutionResult::Failed(_)) {
            metrics::tasks_failed_total().add(
                1,
                &[
                    KeyValue::new("task_type", task.task_type.clone()),
                    KeyValue::new("reason", metric_reason),
                ],
            );
        }
        result
    }

    /// A refused update means the lock was lost (typically to the reaper).
    fn record(
        &self,
        task: &Task,
        operation: &str,
        applied: Result<bool>,
        success: ExecutionResult,
    ) -> ExecutionResult {
        match applied {
            Ok(true) => success,
            Ok(false) => {
                warn!(
                    task_id = %task.id,
                    worker_id = %self.worker_id,
                    operation = operation,
                    "Lock no longer held, outcome discarded"
                );
                ExecutionResult::Abandoned
            }
            Err(e) => {
                error!(
                    task_id = %task.id,
                    worker_id = %self.worker_id,
                    operation = operation,
                    error = %e,
                    "Failed to record task outcome, leaving task for the reaper"
                );
                ExecutionResult::Abandoned
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// `pool_size` independent [`TaskWorker`] loops sharing one store.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Arc<TaskWorker>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        retry: BackoffConfig,
        config: WorkerConfig,
    ) -> Self {
        let workers = (0..config.pool_size)
            .map(|index| {
                Arc::new(TaskWorker::new(
                    config.worker_id(index),
                    Arc::clone(&store),
                    Arc::clone(&registry),
                    retry.clone(),
                    config.clone(),
                ))
            })
            .collect();
        Self { workers }
    }

    pub fn workers(&self) -> &[Arc<TaskWorker>] {
        &self.workers
    }

    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.workers
            .iter()
            .map(|worker| {
                let worker = Arc::clone(worker);
                let receiver = shutdown.subscribe();
                tokio::spawn(async move { worker.run(receiver).await })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(boxed.as_ref()), "kaboom");

        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_pool_worker_ids() {
        let config = WorkerConfig {
            node_id: "node-a".to_string(),
            pool_size: 3,
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::new(
            Arc::new(crate::database::InMemoryTaskStore::new()),
            Arc::new(HandlerRegistry::new()),
            BackoffConfig::default(),
            config,
        );
        let ids: Vec<&str> = pool.workers().iter().map(|w| w.worker_id()).collect();
        assert_eq!(ids, vec!["node-a-0", "node-a-1", "node-a-2"]);
    }
}
