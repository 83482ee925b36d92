//! Error types for the Taskforge engine.
//!
//! Synchronous submission and query failures are returned directly to the
//! caller. Execution-time failures never leave the worker loop; they are
//! recorded on the task row instead (see [`crate::orchestration::handler::HandlerError`]).

use thiserror::Error;
use uuid::Uuid;

use crate::constants::TaskStatus;
use crate::scheduling::PatternError;

/// Name of the unique index guarding `tasks.external_reference`.
pub const EXTERNAL_REFERENCE_CONSTRAINT: &str = "tasks_external_reference_key";

/// Name of the foreign key from `tasks.task_type` to `task_types.code`.
pub const TASK_TYPE_FOREIGN_KEY: &str = "tasks_task_type_fkey";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskforgeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Duplicate external reference: {0}")]
    DuplicateExternalReference(String),

    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Task {task_id} is {current}, operation requires one of {expected:?}")]
    PreconditionFailed {
        task_id: Uuid,
        current: TaskStatus,
        expected: Vec<TaskStatus>,
    },

    #[error("Transient execution failure: {0}")]
    TransientExecutionFailure(String),

    #[error("Terminal execution failure: {0}")]
    TerminalExecutionFailure(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Scheduling pattern error: {0}")]
    Pattern(#[from] PatternError),
}

impl TaskforgeError {
    /// Whether a later poll or sweep may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::TransientExecutionFailure(_)
        )
    }
}

impl From<sqlx::Error> for TaskforgeError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.constraint() {
                Some(EXTERNAL_REFERENCE_CONSTRAINT) => {
                    return TaskforgeError::DuplicateExternalReference(db_err.message().to_string());
                }
                Some(TASK_TYPE_FOREIGN_KEY) => {
                    return TaskforgeError::InvalidArgument(format!(
                        "unknown task type: {}",
                        db_err.message()
                    ));
                }
                _ => {}
            }
        }
        TaskforgeError::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TaskforgeError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        TaskforgeError::StoreUnavailable(format!("migration failed: {err}"))
    }
}

impl From<serde_json::Error> for TaskforgeError {
    fn from(error: serde_json::Error) -> Self {
        TaskforgeError::InvalidArgument(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, TaskforgeError>;
