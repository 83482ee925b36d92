//! In-process [`TaskStore`] backed by a single mutex.
//!
//! All operations serialize through one lock, so every transition is atomic
//! and a task can never be claimed twice. Per-type concurrency limits are
//! enforced exactly.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::store::TaskStore;
use crate::constants::{status_groups, TaskEventType, TaskPriority, TaskStatus};
use crate::error::{Result, TaskforgeError};
use crate::models::{
    ArchivedTask, PageRequest, Task, TaskEvent, TaskFilter, TaskPage, TaskTypeDefinition,
};
use crate::state_machine::{self, TaskTransition};

#[derive(Debug, Default)]
struct MemoryState {
    tasks: HashMap<Uuid, Task>,
    events: HashMap<Uuid, Vec<TaskEvent>>,
    task_types: BTreeMap<String, TaskTypeDefinition>,
    archived: HashMap<Uuid, ArchivedTask>,
}

impl MemoryState {
    /// Guard-check and apply one transition. `false` when refused.
    fn transition(&mut self, id: Uuid, transition: &TaskTransition, now: DateTime<Utc>) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        if let Err(rejection) = state_machine::check(transition, task, now) {
            debug!(
                task_id = %id,
                transition = transition.name(),
                reason = %rejection,
                "Transition refused"
            );
            return false;
        }
        if let Some(event) = transition.apply(task, now) {
            self.events.entry(id).or_default().push(event);
        }
        true
    }

    fn transition_batch(
        &mut self,
        batch_id: &str,
        transition: &TaskTransition,
        now: DateTime<Utc>,
    ) -> u64 {
        let target = transition.target_status();
        let ids: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|task| task.batch_id.as_deref() == Some(batch_id) && task.status != target)
            .map(|task| task.id)
            .collect();

        ids.into_iter()
            .filter(|id| self.transition(*id, transition, now))
            .count() as u64
    }

    fn executing_count(&self, task_type: &str) -> usize {
        self.tasks
            .values()
            .filter(|task| task.task_type == task_type && task.status == TaskStatus::Executing)
            .count()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a live task row as-is. Intended for tests that need to
    /// fabricate timestamps.
    pub fn put_task(&self, task: Task) {
        self.state.lock().tasks.insert(task.id, task);
    }

    pub fn live_task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn register_task_type(&self, definition: &TaskTypeDefinition) -> Result<()> {
        definition.validate()?;
        self.state
            .lock()
            .task_types
            .insert(definition.code.clone(), definition.clone());
        Ok(())
    }

    async fn set_task_type_enabled(&self, code: &str, enabled: bool) -> Result<bool> {
        let mut state = self.state.lock();
        Ok(match state.task_types.get_mut(code) {
            Some(definition) => {
                definition.enabled = enabled;
                true
            }
            None => false,
        })
    }

    async fn task_types(&self) -> Result<Vec<TaskTypeDefinition>> {
        Ok(self.state.lock().task_types.values().cloned().collect())
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock();
        if !state.task_types.contains_key(&task.task_type) {
            return Err(TaskforgeError::InvalidArgument(format!(
                "unknown task type: {}",
                task.task_type
            )));
        }
        if state.tasks.contains_key(&task.id) {
            return Err(TaskforgeError::InvalidArgument(format!(
                "task {} already exists",
                task.id
            )));
        }
        if let Some(reference) = &task.external_reference {
            let taken = state
                .tasks
                .values()
                .any(|existing| existing.external_reference.as_ref() == Some(reference));
            if taken {
                return Err(TaskforgeError::DuplicateExternalReference(
                    reference.clone(),
                ));
            }
        }

        state.tasks.insert(task.id, task.clone());
        state.events.insert(
            task.id,
            vec![TaskEvent::new(task.id, TaskEventType::Submitted, task.queued)],
        );
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.state.lock().tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage> {
        let state = self.state.lock();
        let mut matching: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| filter.accepts(task))
            .collect();
        matching.sort_by_key(|task| (task.queued, task.id));

        let total = matching.len() as u64;
        let tasks = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(TaskPage { tasks, total, page })
    }

    async fn claim_tasks(
        &self,
        worker_id: &str,
        task_types: &[String],
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut state = self.state.lock();

        let mut candidates: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| task.is_eligible(now) && task_types.contains(&task.task_type))
            .filter(|task| {
                state
                    .task_types
                    .get(&task.task_type)
                    .is_some_and(|definition| definition.enabled)
            })
            .collect();
        candidates.sort_by_key(|task| (task.priority, task.queued, task.id));

        let mut in_flight: HashMap<String, usize> = HashMap::new();
        let mut selected = Vec::new();
        for task in candidates {
            if selected.len() >= limit as usize {
                break;
            }
            let executing = *in_flight
                .entry(task.task_type.clone())
                .or_insert_with(|| state.executing_count(&task.task_type));
            let has_capacity = state
                .task_types
                .get(&task.task_type)
                .map_or(false, |definition| definition.has_capacity(executing));
            if has_capacity {
                in_flight.insert(task.task_type.clone(), executing + 1);
                selected.push(task.id);
            }
        }

        let claim = TaskTransition::Claim {
            worker_id: worker_id.to_string(),
        };
        let mut claimed = Vec::with_capacity(selected.len());
        for id in selected {
            if state.transition(id, &claim, now) {
                if let Some(task) = state.tasks.get(&id) {
                    claimed.push(task.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn complete_task(
        &self,
        id: Uuid,
        worker_id: &str,
        data: Option<Value>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let transition = TaskTransition::Complete {
            worker_id: worker_id.to_string(),
            data,
            elapsed_ms,
        };
        Ok(self.state.lock().transition(id, &transition, now))
    }

    async fn fail_task(
        &self,
        id: Uuid,
        worker_id: &str,
        failure: &str,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let transition = TaskTransition::Fail {
            worker_id: worker_id.to_string(),
            failure: failure.to_string(),
            elapsed_ms,
        };
        Ok(self.state.lock().transition(id, &transition, now))
    }

    async fn delay_task(
        &self,
        id: Uuid,
        worker_id: &str,
        next_execution: DateTime<Utc>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let transition = TaskTransition::Delay {
            worker_id: worker_id.to_string(),
            next_execution,
            elapsed_ms,
        };
        Ok(self.state.lock().transition(id, &transition, now))
    }

    async fn advance_task_step(
        &self,
        id: Uuid,
        worker_id: &str,
        step: &str,
        data: Option<Value>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let transition = TaskTransition::AdvanceStep {
            worker_id: worker_id.to_string(),
            step: step.to_string(),
            data,
            elapsed_ms,
        };
        Ok(self.state.lock().transition(id, &transition, now))
    }

    async fn cancel_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.state.lock().transition(id, &TaskTransition::Cancel, now))
    }

    async fn suspend_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.state.lock().transition(id, &TaskTransition::Suspend, now))
    }

    async fn unsuspend_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .transition(id, &TaskTransition::Unsuspend, now))
    }

    async fn cancel_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .transition_batch(batch_id, &TaskTransition::Cancel, now))
    }

    async fn suspend_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .transition_batch(batch_id, &TaskTransition::Suspend, now))
    }

    async fn unsuspend_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .transition_batch(batch_id, &TaskTransition::Unsuspend, now))
    }

    async fn requeue_hung_tasks(
        &self,
        locked_before: DateTime<Utc>,
        task_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock();
        let hung: Vec<Uuid> = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Executing)
            .filter(|task| task_type.map_or(true, |code| task.task_type == code))
            .map(|task| task.id)
            .collect();

        let recover = TaskTransition::Recover { locked_before };
        Ok(hung
            .into_iter()
            .filter(|id| state.transition(*id, &recover, now))
            .collect())
    }

    async fn archive_tasks(
        &self,
        executed_before: DateTime<Utc>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let mut expired: Vec<(DateTime<Utc>, Uuid)> = state
            .tasks
            .values()
            .filter(|task| status_groups::TERMINAL.contains(&task.status))
            .filter_map(|task| {
                task.executed
                    .filter(|executed| *executed <= executed_before)
                    .map(|executed| (executed, task.id))
            })
            .collect();
        expired.sort();
        expired.truncate(limit as usize);

        let mut removed = 0;
        for (_, id) in expired {
            let Some(task) = state.tasks.get(&id).cloned() else {
                continue;
            };
            state
                .archived
                .entry(id)
                .or_insert(ArchivedTask {
                    task,
                    archived: now,
                });
            state.tasks.remove(&id);
            state.events.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }

    async fn find_archived_task(&self, id: Uuid) -> Result<Option<ArchivedTask>> {
        Ok(self.state.lock().archived.get(&id).cloned())
    }

    async fn task_events(&self, id: Uuid) -> Result<Vec<TaskEvent>> {
        Ok(self
            .state
            .lock()
            .events
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}
