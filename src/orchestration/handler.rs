//! # Task Handlers
//!
//! A [`TaskHandler`] performs the work for one task type. Workers resolve the
//! handler through a [`HandlerRegistry`] keyed by task type code and map the
//! returned [`TaskOutcome`] or [`HandlerError`] onto a lifecycle transition.
//!
//! ## Usage
//!
//! ```rust
//! use async_trait::async_trait;
//! use taskforge_core::orchestration::handler::{
//!     HandlerError, HandlerRegistry, TaskContext, TaskHandler, TaskOutcome,
//! };
//! use std::sync::Arc;
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl TaskHandler for SendEmail {
//!     async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
//!         let _payload: Option<serde_json::Value> = ctx.decode_data()?;
//!         Ok(TaskOutcome::completed())
//!     }
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("email.send", Arc::new(SendEmail)).unwrap();
//! assert!(registry.contains("email.send"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::BackoffConfig;
use crate::error::{Result, TaskforgeError};
use crate::models::Task;

/// What a handler sees of the task it is executing.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: Task,
    pub worker_id: String,
}

impl TaskContext {
    pub fn new(task: Task, worker_id: impl Into<String>) -> Self {
        Self {
            task,
            worker_id: worker_id.into(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task.id
    }

    pub fn step(&self) -> Option<&str> {
        self.task.step.as_deref()
    }

    /// 1-based attempt number for the current step
    pub fn attempt(&self) -> i32 {
        self.task.execution_attempts
    }

    pub fn data(&self) -> Option<&Value> {
        self.task.data.as_ref()
    }

    /// Malformed payloads fail the task terminally; retrying cannot fix them.
    pub fn decode_data<T: DeserializeOwned>(&self) -> std::result::Result<Option<T>, HandlerError> {
        self.task
            .decode_data()
            .map_err(|e| HandlerError::Terminal(e.to_string()))
    }
}

/// Successful handler result.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task is finished; `data` replaces the payload when present
    Completed { data: Option<Value> },
    /// Requeue a multi-step task at `step`
    NextStep { step: String, data: Option<Value> },
}

impl TaskOutcome {
    pub fn completed() -> Self {
        Self::Completed { data: None }
    }

    pub fn completed_with(data: Value) -> Self {
        Self::Completed { data: Some(data) }
    }

    pub fn next_step(step: impl Into<String>) -> Self {
        Self::NextStep {
            step: step.into(),
            data: None,
        }
    }

    pub fn next_step_with(step: impl Into<String>, data: Value) -> Self {
        Self::NextStep {
            step: step.into(),
            data: Some(data),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::NextStep { .. } => "next_step",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    /// Retryable; the worker requeues until the attempt limit is reached
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        /// Overrides the computed backoff for this retry
        retry_after: Option<Duration>,
    },

    #[error("terminal failure: {0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn retry_after(reason: impl Into<String>, delay: Duration) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: Some(delay),
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal(reason.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. } => reason,
            Self::Terminal(reason) => reason,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Terminal(_) => "terminal",
        }
    }
}

/// Untyped errors are assumed recoverable.
impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(format!("{err:#}"))
    }
}

impl From<HandlerError> for TaskforgeError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Transient { reason, .. } => {
                TaskforgeError::TransientExecutionFailure(reason)
            }
            HandlerError::Terminal(reason) => TaskforgeError::TerminalExecutionFailure(reason),
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn execute(&self, ctx: &TaskContext) -> std::result::Result<TaskOutcome, HandlerError>;

    /// Per-type retry policy; `None` uses the engine default
    fn retry_policy(&self) -> Option<BackoffConfig> {
        None
    }
}

/// Task type code to handler map, fixed once the engine starts.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let task_type = task_type.into();
        if task_type.trim().is_empty() {
            return Err(TaskforgeError::InvalidArgument(
                "handler task type must not be empty".to_string(),
            ));
        }
        if self.handlers.contains_key(&task_type) {
            return Err(TaskforgeError::InvalidArgument(format!(
                "handler already registered for task type: {task_type}"
            )));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered type codes, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
