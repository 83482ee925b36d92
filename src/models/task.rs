//! # Task Model
//!
//! A task is one unit of schedulable, resumable work. Rows live in the
//! `tasks` table and are mutated exclusively through the lifecycle
//! transitions in [`crate::state_machine`].
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE tasks (
//!   id UUID PRIMARY KEY,
//!   task_type VARCHAR(128) NOT NULL REFERENCES task_types(code),
//!   status VARCHAR(16) NOT NULL,
//!   priority SMALLINT NOT NULL,
//!   step VARCHAR(128),
//!   data JSONB,
//!   batch_id VARCHAR(255),
//!   external_reference VARCHAR(255) UNIQUE,
//!   queued TIMESTAMPTZ NOT NULL,
//!   executed TIMESTAMPTZ,
//!   next_execution TIMESTAMPTZ,
//!   execution_attempts INTEGER NOT NULL DEFAULT 0,
//!   execution_time_ms BIGINT NOT NULL DEFAULT 0,
//!   locked TIMESTAMPTZ,
//!   lock_name VARCHAR(255),
//!   failure TEXT
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::constants::{system, TaskPriority, TaskStatus};
use crate::error::{Result, TaskforgeError};

/// A live task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub step: Option<String>,
    pub data: Option<serde_json::Value>,
    pub batch_id: Option<String>,
    pub external_reference: Option<String>,
    pub queued: DateTime<Utc>,
    pub executed: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_attempts: i32,
    pub execution_time_ms: i64,
    pub locked: Option<DateTime<Utc>>,
    pub lock_name: Option<String>,
    pub failure: Option<String>,
}

impl Task {
    /// Build the initial QUEUED row for a submission.
    pub fn from_submission(id: Uuid, new_task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type: new_task.task_type,
            status: TaskStatus::Queued,
            priority: new_task.priority,
            step: new_task.step,
            data: new_task.data,
            batch_id: new_task.batch_id,
            external_reference: new_task.external_reference,
            queued: now,
            executed: None,
            next_execution: new_task.next_execution,
            execution_attempts: 0,
            execution_time_ms: 0,
            locked: None,
            lock_name: None,
            failure: None,
        }
    }

    /// Claim eligibility, ignoring whether the task type is enabled.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Queued && self.next_execution.map_or(true, |at| at <= now)
    }

    pub fn is_locked_by(&self, worker_id: &str) -> bool {
        self.status == TaskStatus::Executing && self.lock_name.as_deref() == Some(worker_id)
    }

    pub fn is_multi_step(&self) -> bool {
        self.step.is_some()
    }

    /// Deserialize the payload into the handler's own type.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(TaskforgeError::from)
    }
}

/// Raw `tasks` row as read by sqlx.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub task_type: String,
    pub status: String,
    pub priority: i16,
    pub step: Option<String>,
    pub data: Option<serde_json::Value>,
    pub batch_id: Option<String>,
    pub external_reference: Option<String>,
    pub queued: DateTime<Utc>,
    pub executed: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_attempts: i32,
    pub execution_time_ms: i64,
    pub locked: Option<DateTime<Utc>>,
    pub lock_name: Option<String>,
    pub failure: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskforgeError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(TaskforgeError::StoreUnavailable)?;
        let priority = TaskPriority::from_code(row.priority).ok_or_else(|| {
            TaskforgeError::StoreUnavailable(format!("Invalid task priority: {}", row.priority))
        })?;

        Ok(Self {
            id: row.id,
            task_type: row.task_type,
            status,
            priority,
            step: row.step,
            data: row.data,
            batch_id: row.batch_id,
            external_reference: row.external_reference,
            queued: row.queued,
            executed: row.executed,
            next_execution: row.next_execution,
            execution_attempts: row.execution_attempts,
            execution_time_ms: row.execution_time_ms,
            locked: row.locked,
            lock_name: row.lock_name,
            failure: row.failure,
        })
    }
}

/// Column list shared by every query that materializes a [`TaskRow`].
pub const TASK_COLUMNS: &str = "id, task_type, status, priority, step, data, batch_id, \
     external_reference, queued, executed, next_execution, execution_attempts, \
     execution_time_ms, locked, lock_name, failure";

/// A submission request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Initial step of a multi-step task
    pub step: Option<String>,
    pub batch_id: Option<String>,
    pub external_reference: Option<String>,
    pub next_execution: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.next_execution = Some(at);
        self
    }

    /// Reject malformed submissions before they reach the store.
    pub fn validate(&self) -> Result<()> {
        let task_type = self.task_type.trim();
        if task_type.is_empty() {
            return Err(TaskforgeError::InvalidArgument(
                "task_type must not be empty".to_string(),
            ));
        }
        if task_type.len() != self.task_type.len() {
            return Err(TaskforgeError::InvalidArgument(
                "task_type must not have surrounding whitespace".to_string(),
            ));
        }
        if self.task_type.len() > system::MAX_TASK_TYPE_LENGTH {
            return Err(TaskforgeError::InvalidArgument(format!(
                "task_type exceeds {} characters",
                system::MAX_TASK_TYPE_LENGTH
            )));
        }
        if let Some(reference) = &self.external_reference {
            if reference.trim().is_empty() {
                return Err(TaskforgeError::InvalidArgument(
                    "external_reference must not be blank".to_string(),
                ));
            }
            if reference.len() > system::MAX_EXTERNAL_REFERENCE_LENGTH {
                return Err(TaskforgeError::InvalidArgument(format!(
                    "external_reference exceeds {} characters",
                    system::MAX_EXTERNAL_REFERENCE_LENGTH
                )));
            }
        }
        if matches!(&self.batch_id, Some(batch) if batch.trim().is_empty()) {
            return Err(TaskforgeError::InvalidArgument(
                "batch_id must not be blank".to_string(),
            ));
        }
        if matches!(&self.step, Some(step) if step.trim().is_empty()) {
            return Err(TaskforgeError::InvalidArgument(
                "step must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listing filter. Empty fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
    pub task_type: Option<String>,
    pub batch_id: Option<String>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn accepts(&self, task: &Task) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && self
                .task_type
                .as_ref()
                .map_or(true, |task_type| &task.task_type == task_type)
            && self
                .batch_id
                .as_ref()
                .map_or(true, |batch| task.batch_id.as_ref() == Some(batch))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(offset: u64, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, system::MAX_PAGE_SIZE),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(0, limit)
    }

    pub fn next(&self) -> Self {
        Self::new(self.offset + u64::from(self.limit), self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(system::DEFAULT_PAGE_SIZE)
    }
}

/// One page of a listing, ordered by `(queued, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
    pub page: PageRequest,
}

impl TaskPage {
    pub fn has_more(&self) -> bool {
        self.page.offset + (self.tasks.len() as u64) < self.total
    }
}
