//! Preconditions checked before a transition is applied to a task.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::transitions::TaskTransition;
use crate::constants::TaskStatus;
use crate::error::TaskforgeError;
use crate::models::Task;

/// Why a transition was refused for a particular task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardRejection {
    #[error("status {current} does not permit {transition}")]
    Status {
        transition: &'static str,
        current: TaskStatus,
        expected: &'static [TaskStatus],
    },

    #[error("task is locked by {holder:?}, not {requested}")]
    NotLockHolder {
        holder: Option<String>,
        requested: String,
    },

    #[error("task is not eligible before {0}")]
    NotYetEligible(DateTime<Utc>),

    #[error("task has no step to advance from")]
    NotMultiStep,

    #[error("lease is still active")]
    LeaseActive,
}

impl GuardRejection {
    /// Convert into the caller-facing error for task `task`.
    pub fn into_error(self, task: &Task) -> TaskforgeError {
        match self {
            Self::Status { expected, .. } => TaskforgeError::PreconditionFailed {
                task_id: task.id,
                current: task.status,
                expected: expected.to_vec(),
            },
            other => TaskforgeError::PreconditionFailed {
                task_id: task.id,
                current: task.status,
                expected: vec![match other {
                    Self::NotYetEligible(_) => TaskStatus::Queued,
                    _ => TaskStatus::Executing,
                }],
            },
        }
    }
}

/// Check every precondition of `transition` against the current row.
pub fn check(
    transition: &TaskTransition,
    task: &Task,
    now: DateTime<Utc>,
) -> Result<(), GuardRejection> {
    let expected = transition.allowed_from();
    if !expected.contains(&task.status) {
        return Err(GuardRejection::Status {
            transition: transition.name(),
            current: task.status,
            expected,
        });
    }

    if let Some(worker_id) = transition.lock_holder() {
        if !task.is_locked_by(worker_id) {
            return Err(GuardRejection::NotLockHolder {
                holder: task.lock_name.clone(),
                requested: worker_id.to_string(),
            });
        }
    }

    match transition {
        TaskTransition::Claim { .. } if !task.is_eligible(now) => Err(
            GuardRejection::NotYetEligible(task.next_execution.unwrap_or(now)),
        ),
        TaskTransition::AdvanceStep { .. } if !task.is_multi_step() => {
            Err(GuardRejection::NotMultiStep)
        }
        TaskTransition::Recover { locked_before }
            if task.locked.map_or(true, |locked| locked >= *locked_before) =>
        {
            Err(GuardRejection::LeaseActive)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use chrono::Duration;
    use uuid::Uuid;

    fn task() -> Task {
        Task::from_submission(Uuid::new_v4(), NewTask::new("t"), Utc::now())
    }

    #[test]
    fn test_cancel_of_completed_is_rejected() {
        let mut task = task();
        task.status = TaskStatus::Completed;
        let rejection = check(&TaskTransition::Cancel, &task, Utc::now()).unwrap_err();
        assert!(matches!(
            rejection,
            GuardRejection::Status {
                current: TaskStatus::Completed,
                ..
            }
        ));
        assert!(matches!(
            rejection.into_error(&task),
            TaskforgeError::PreconditionFailed { .. }
        ));
    }

    #[test]
    fn test_cancel_of_cancelled_is_permitted() {
        let mut task = task();
        task.status = TaskStatus::Cancelled;
        assert!(check(&TaskTransition::Cancel, &task, Utc::now()).is_ok());
    }

    #[test]
    fn test_lock_holder_required() {
        let now = Utc::now();
        let mut task = task();
        TaskTransition::Claim {
            worker_id: "w-1".into(),
        }
        .apply(&mut task, now);

        let foreign = TaskTransition::Fail {
            worker_id: "w-2".into(),
            failure: "boom".into(),
            elapsed_ms: 0,
        };
        assert!(matches!(
            check(&foreign, &task, now),
            Err(GuardRejection::NotLockHolder { .. })
        ));
    }

    #[test]
    fn test_claim_honors_next_execution() {
        let now = Utc::now();
        let mut task = task();
        let claim = TaskTransition::Claim {
            worker_id: "w".into(),
        };

        task.next_execution = Some(now - Duration::seconds(1));
        assert!(check(&claim, &task, now).is_ok());

        task.next_execution = Some(now + Duration::hours(1));
        assert!(matches!(
            check(&claim, &task, now),
            Err(GuardRejection::NotYetEligible(_))
        ));
    }

    #[test]
    fn test_advance_requires_step() {
        let now = Utc::now();
        let mut task = task();
        TaskTransition::Claim {
            worker_id: "w".into(),
        }
        .apply(&mut task, now);
        let advance = TaskTransition::AdvanceStep {
            worker_id: "w".into(),
            step: "next".into(),
            data: None,
            elapsed_ms: 0,
        };
        assert_eq!(
            check(&advance, &task, now),
            Err(GuardRejection::NotMultiStep)
        );
    }

    #[test]
    fn test_recover_requires_expired_lease() {
        let now = Utc::now();
        let mut task = task();
        TaskTransition::Claim {
            worker_id: "w".into(),
        }
        .apply(&mut task, now - Duration::minutes(10));

        let expired = TaskTransition::Recover {
            locked_before: now - Duration::minutes(5),
        };
        assert!(check(&expired, &task, now).is_ok());

        let fresh = TaskTransition::Recover {
            locked_before: now - Duration::minutes(20),
        };
        assert_eq!(check(&fresh, &task, now), Err(GuardRejection::LeaseActive));
    }
}
