//! # Task Store Contract
//!
//! Persistence interface for the engine. Every lifecycle operation is one
//! method, applied as a single all-or-nothing conditional update that
//! reports whether it affected the task. A `false` return means the
//! precondition did not hold (or the task does not exist); callers that need
//! to tell those apart re-read the row.
//!
//! Implementations:
//! - [`crate::database::PgTaskStore`] - PostgreSQL, row locks via
//!   `FOR UPDATE SKIP LOCKED`
//! - [`crate::database::InMemoryTaskStore`] - single mutex, for tests and
//!   embedded use

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ArchivedTask, PageRequest, Task, TaskEvent, TaskFilter, TaskPage, TaskTypeDefinition,
};

#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Insert or replace a task type definition.
    async fn register_task_type(&self, definition: &TaskTypeDefinition) -> Result<()>;

    /// Returns `false` when the type is unknown.
    async fn set_task_type_enabled(&self, code: &str, enabled: bool) -> Result<bool>;

    async fn task_types(&self) -> Result<Vec<TaskTypeDefinition>>;

    /// Persist a freshly submitted task and its SUBMITTED event.
    ///
    /// Fails with `InvalidArgument` for an unregistered type and
    /// `DuplicateExternalReference` on a reference collision.
    async fn create_task(&self, task: &Task) -> Result<()>;

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>>;

    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage>;

    /// Lock up to `limit` eligible tasks of the given types for `worker_id`.
    ///
    /// Returned tasks are already EXECUTING, in `(priority, queued)` order.
    async fn claim_tasks(
        &self,
        worker_id: &str,
        task_types: &[String],
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>>;

    async fn complete_task(
        &self,
        id: Uuid,
        worker_id: &str,
        data: Option<Value>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn fail_task(
        &self,
        id: Uuid,
        worker_id: &str,
        failure: &str,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delay_task(
        &self,
        id: Uuid,
        worker_id: &str,
        next_execution: DateTime<Utc>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn advance_task_step(
        &self,
        id: Uuid,
        worker_id: &str,
        step: &str,
        data: Option<Value>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Succeeds without side effects when the task is already CANCELLED.
    async fn cancel_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Succeeds without side effects when the task is already SUSPENDED.
    async fn suspend_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn unsuspend_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Number of tasks in the batch that changed status.
    async fn cancel_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64>;

    async fn suspend_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64>;

    async fn unsuspend_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Return EXECUTING tasks locked before `locked_before` to QUEUED,
    /// optionally limited to one task type. Attempts are left untouched.
    async fn requeue_hung_tasks(
        &self,
        locked_before: DateTime<Utc>,
        task_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;

    /// Copy up to `limit` terminal tasks executed at or before
    /// `executed_before` into the archive, then delete them from the live
    /// store. Returns the number of tasks removed.
    async fn archive_tasks(
        &self,
        executed_before: DateTime<Utc>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn find_archived_task(&self, id: Uuid) -> Result<Option<ArchivedTask>>;

    /// Audit trail in timestamp order.
    async fn task_events(&self, id: Uuid) -> Result<Vec<TaskEvent>>;
}
