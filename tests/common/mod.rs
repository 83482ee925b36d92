//! Shared fixtures for the in-memory integration tests.

#![allow(dead_code)] // Each test binary uses a different subset

pub mod handlers;
pub mod strategies;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use taskforge_core::config::{BackoffConfig, WorkerConfig};
use taskforge_core::constants::TaskStatus;
use taskforge_core::database::{InMemoryTaskStore, TaskStore};
use taskforge_core::models::{NewTask, Task, TaskTypeDefinition};
use taskforge_core::orchestration::{HandlerRegistry, TaskLifecycle, TaskWorker};
use uuid::Uuid;

pub use handlers::*;

pub const WORKER_ID: &str = "test-node-0";

/// Store with the given task types registered and enabled.
pub async fn store_with_types(types: &[&str]) -> Arc<InMemoryTaskStore> {
    let store = Arc::new(InMemoryTaskStore::new());
    for code in types {
        store
            .register_task_type(&TaskTypeDefinition::new(*code))
            .await
            .expect("register task type");
    }
    store
}

pub fn lifecycle(store: &Arc<InMemoryTaskStore>) -> TaskLifecycle {
    TaskLifecycle::new(store.clone())
}

/// Retries become eligible immediately so a test can drive them with
/// back-to-back polls.
pub fn immediate_retry(max_attempts: u32) -> BackoffConfig {
    BackoffConfig {
        max_attempts,
        base_delay_ms: 0,
        max_delay_ms: 0,
        multiplier: 1.0,
    }
}

pub fn worker(
    store: &Arc<InMemoryTaskStore>,
    registry: HandlerRegistry,
    retry: BackoffConfig,
) -> TaskWorker {
    TaskWorker::new(
        WORKER_ID,
        store.clone(),
        Arc::new(registry),
        retry,
        WorkerConfig {
            claim_batch_size: 10,
            ..WorkerConfig::default()
        },
    )
}

pub async fn task(store: &Arc<InMemoryTaskStore>, id: Uuid) -> Task {
    store
        .find_task(id)
        .await
        .expect("store read")
        .expect("task exists")
}

/// Fabricate a task already in `status`, bypassing the lifecycle.
pub fn task_in_state(
    task_type: &str,
    status: TaskStatus,
    queued: DateTime<Utc>,
) -> Task {
    let mut task = Task::from_submission(Uuid::new_v4(), NewTask::new(task_type), queued);
    task.status = status;
    match status {
        TaskStatus::Executing => {
            task.locked = Some(queued);
            task.lock_name = Some("crashed-node-0".to_string());
            task.execution_attempts = 1;
        }
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
            task.executed = Some(queued + Duration::seconds(5));
        }
        TaskStatus::Queued | TaskStatus::Suspended => {}
    }
    task
}
