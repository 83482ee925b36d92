//! Task transitions: allowed source statuses, target status, audit event
//! and the in-place row update each one performs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{status_groups, TaskEventType, TaskStatus};
use crate::models::{Task, TaskEvent};

/// Every mutation a live task can undergo after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskTransition {
    /// Lock a QUEUED task for execution
    Claim { worker_id: String },
    /// Finish successfully, optionally replacing the payload
    Complete {
        worker_id: String,
        data: Option<Value>,
        elapsed_ms: i64,
    },
    /// Finish terminally with a failure description
    Fail {
        worker_id: String,
        failure: String,
        elapsed_ms: i64,
    },
    /// Release the lock and requeue for a later attempt
    Delay {
        worker_id: String,
        next_execution: DateTime<Utc>,
        elapsed_ms: i64,
    },
    /// Requeue a multi-step task at its next stage
    AdvanceStep {
        worker_id: String,
        step: String,
        data: Option<Value>,
        elapsed_ms: i64,
    },
    Cancel,
    Suspend,
    Unsuspend,
    /// Release a lease that expired before `locked_before`
    Recover { locked_before: DateTime<Utc> },
}

impl TaskTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Delay { .. } => "delay",
            Self::AdvanceStep { .. } => "advance_step",
            Self::Cancel => "cancel",
            Self::Suspend => "suspend",
            Self::Unsuspend => "unsuspend",
            Self::Recover { .. } => "recover",
        }
    }

    /// Statuses from which this transition may be applied, self-transitions included.
    pub fn allowed_from(&self) -> &'static [TaskStatus] {
        match self {
            Self::Claim { .. } => &[TaskStatus::Queued],
            Self::Complete { .. }
            | Self::Fail { .. }
            | Self::Delay { .. }
            | Self::AdvanceStep { .. }
            | Self::Recover { .. } => &[TaskStatus::Executing],
            Self::Cancel => &status_groups::CANCELLABLE,
            Self::Suspend => &status_groups::SUSPENDABLE,
            Self::Unsuspend => &status_groups::UNSUSPENDABLE,
        }
    }

    pub fn target_status(&self) -> TaskStatus {
        match self {
            Self::Claim { .. } => TaskStatus::Executing,
            Self::Complete { .. } => TaskStatus::Completed,
            Self::Fail { .. } => TaskStatus::Failed,
            Self::Delay { .. }
            | Self::AdvanceStep { .. }
            | Self::Unsuspend
            | Self::Recover { .. } => TaskStatus::Queued,
            Self::Cancel => TaskStatus::Cancelled,
            Self::Suspend => TaskStatus::Suspended,
        }
    }

    pub fn event_type(&self) -> TaskEventType {
        match self {
            Self::Claim { .. } => TaskEventType::Claimed,
            Self::Complete { .. } => TaskEventType::Completed,
            Self::Fail { .. } => TaskEventType::Failed,
            Self::Delay { .. } => TaskEventType::Delayed,
            Self::AdvanceStep { .. } => TaskEventType::StepAdvanced,
            Self::Cancel => TaskEventType::Cancelled,
            Self::Suspend => TaskEventType::Suspended,
            Self::Unsuspend => TaskEventType::Unsuspended,
            Self::Recover { .. } => TaskEventType::Recovered,
        }
    }

    /// Worker that must hold the lock, for transitions issued by a lock holder.
    pub fn lock_holder(&self) -> Option<&str> {
        match self {
            Self::Complete { worker_id, .. }
            | Self::Fail { worker_id, .. }
            | Self::Delay { worker_id, .. }
            | Self::AdvanceStep { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }

    /// Execution time to add to the task's running total.
    pub fn elapsed_ms(&self) -> i64 {
        match self {
            Self::Complete { elapsed_ms, .. }
            | Self::Fail { elapsed_ms, .. }
            | Self::Delay { elapsed_ms, .. }
            | Self::AdvanceStep { elapsed_ms, .. } => (*elapsed_ms).max(0),
            _ => 0,
        }
    }

    /// Mutate `task` in place. The caller must have checked the guards.
    ///
    /// Returns the audit event to append, or `None` for a self-transition,
    /// which leaves the task untouched.
    pub fn apply(&self, task: &mut Task, now: DateTime<Utc>) -> Option<TaskEvent> {
        let target = self.target_status();
        if task.status == target {
            return None;
        }

        let previous_lock = task.lock_name.take();
        task.locked = None;
        task.execution_time_ms += self.elapsed_ms();

        let payload = match self {
            Self::Claim { worker_id } => {
                task.locked = Some(now);
                task.lock_name = Some(worker_id.clone());
                task.execution_attempts += 1;
                Some(json!({ "worker_id": worker_id, "attempt": task.execution_attempts }))
            }
            Self::Complete { data, .. } => {
                task.executed = Some(now);
                task.next_execution = None;
                if let Some(data) = data {
                    task.data = Some(data.clone());
                }
                None
            }
            Self::Fail { failure, .. } => {
                task.executed = Some(now);
                task.failure = Some(failure.clone());
                Some(json!({ "failure": failure }))
            }
            Self::Delay { next_execution, .. } => {
                task.next_execution = Some(*next_execution);
                Some(json!({ "next_execution": next_execution }))
            }
            Self::AdvanceStep { step, data, .. } => {
                task.step = Some(step.clone());
                if let Some(data) = data {
                    task.data = Some(data.clone());
                }
                task.execution_attempts = 0;
                task.next_execution = Some(now);
                Some(json!({ "step": step }))
            }
            Self::Cancel => {
                task.executed = Some(now);
                task.next_execution = None;
                None
            }
            Self::Suspend => {
                task.next_execution = None;
                None
            }
            Self::Unsuspend => {
                task.next_execution = Some(now);
                None
            }
            Self::Recover { .. } => Some(json!({ "lock_name": previous_lock })),
        };
        task.status = target;

        let event = TaskEvent::new(task.id, self.event_type(), now);
        Some(match payload {
            Some(payload) => event.with_payload(payload),
            None => event,
        })
    }
}
