//! # Task Lifecycle
//!
//! Caller-facing operations on tasks: submission, status queries and the
//! administrative transitions (cancel, suspend, unsuspend) for single tasks
//! and whole batches. Every transition is one conditional store update.
//!
//! A transition whose precondition does not hold is not an error here; it is
//! reported as [`TransitionOutcome::NoEffect`] with the status the task was
//! found in, so repeated calls stay idempotent.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::constants::TaskStatus;
use crate::database::TaskStore;
use crate::error::{Result, TaskforgeError};
use crate::logging::log_task_operation;
use crate::metrics;
use crate::models::{
    ArchivedTask, NewTask, PageRequest, Task, TaskEvent, TaskFilter, TaskPage, TaskTypeDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Precondition not met; the task was left unchanged
    NoEffect { current: TaskStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Clone)]
pub struct TaskLifecycle {
    store: Arc<dyn TaskStore>,
}

impl std::fmt::Debug for TaskLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycle").finish_non_exhaustive()
    }
}

impl TaskLifecycle {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Validate and persist a new QUEUED task.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed input or an unknown task type,
    /// `DuplicateExternalReference` when the reference is already taken.
    #[instrument(skip(self, new_task), fields(task_type = %new_task.task_type))]
    pub async fn submit(&self, new_task: NewTask) -> Result<Uuid> {
        new_task.validate()?;

        let task = Task::from_submission(Uuid::new_v4(), new_task, Utc::now());
        self.store.create_task(&task).await?;

        metrics::tasks_submitted_total().add(1, &metrics::task_type_label(&task.task_type));
        log_task_operation(
            "submit",
            Some(task.id),
            Some(&task.task_type),
            Some(task.status),
            task.external_reference.as_deref(),
        );

        Ok(task.id)
    }

    pub async fn status(&self, id: Uuid) -> Result<TaskStatus> {
        Ok(self.get(id).await?.status)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        self.store
            .find_task(id)
            .await?
            .ok_or(TaskforgeError::NotFound(id))
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<TransitionOutcome> {
        let applied = self.store.cancel_task(id, Utc::now()).await?;
        self.resolve("cancel", id, applied).await
    }

    #[instrument(skip(self))]
    pub async fn suspend(&self, id: Uuid) -> Result<TransitionOutcome> {
        let applied = self.store.suspend_task(id, Utc::now()).await?;
        self.resolve("suspend", id, applied).await
    }

    #[instrument(skip(self))]
    pub async fn unsuspend(&self, id: Uuid) -> Result<TransitionOutcome> {
        let applied = self.store.unsuspend_task(id, Utc::now()).await?;
        self.resolve("unsuspend", id, applied).await
    }

    /// Returns the number of tasks whose status changed.
    #[instrument(skip(self))]
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<u64> {
        let changed = self.store.cancel_batch(batch_id, Utc::now()).await?;
        log_batch_operation("cancel_batch", batch_id, changed);
        Ok(changed)
    }

    #[instrument(skip(self))]
    pub async fn suspend_batch(&self, batch_id: &str) -> Result<u64> {
        let changed = self.store.suspend_batch(batch_id, Utc::now()).await?;
        log_batch_operation("suspend_batch", batch_id, changed);
        Ok(changed)
    }

    #[instrument(skip(self))]
    pub async fn unsuspend_batch(&self, batch_id: &str) -> Result<u64> {
        let changed = self.store.unsuspend_batch(batch_id, Utc::now()).await?;
        log_batch_operation("unsuspend_batch", batch_id, changed);
        Ok(changed)
    }

    pub async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage> {
        self.store.list_tasks(filter, page).await
    }

    pub async fn events(&self, id: Uuid) -> Result<Vec<TaskEvent>> {
        self.store.task_events(id).await
    }

    pub async fn archived(&self, id: Uuid) -> Result<Option<ArchivedTask>> {
        self.store.find_archived_task(id).await
    }

    pub async fn register_task_type(&self, definition: TaskTypeDefinition) -> Result<()> {
        definition.validate()?;
        self.store.register_task_type(&definition).await?;
        debug!(task_type = %definition.code, enabled = definition.enabled, "Task type registered");
        Ok(())
    }

    /// Disabling a type keeps its tasks but makes them unclaimable.
    pub async fn set_task_type_enabled(&self, code: &str, enabled: bool) -> Result<()> {
        if self.store.set_task_type_enabled(code, enabled).await? {
            debug!(task_type = %code, enabled, "Task type toggled");
            Ok(())
        } else {
            Err(TaskforgeError::InvalidArgument(format!(
                "unknown task type: {code}"
            )))
        }
    }

    pub async fn task_types(&self) -> Result<Vec<TaskTypeDefinition>> {
        self.store.task_types().await
    }

    /// Tell a refused transition apart from a missing task.
    async fn resolve(&self, operation: &str, id: Uuid, applied: bool) -> Result<TransitionOutcome> {
        if applied {
            log_task_operation(operation, Some(id), None, None, None);
            return Ok(TransitionOutcome::Applied);
        }

        let current = self.status(id).await?;
        debug!(
            task_id = %id,
            operation = operation,
            current = %current,
            "Transition had no effect"
        );
        Ok(TransitionOutcome::NoEffect { current })
    }
}

fn log_batch_operation(operation: &str, batch_id: &str, changed: u64) {
    let details = format!("batch_id={batch_id} changed={changed}");
    log_task_operation(operation, None, None, None, Some(&details));
}
