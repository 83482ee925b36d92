//! # Engine Constants
//!
//! Closed sets of named variants shared by the store, the state machine and
//! the worker loop. Every variant carries a stable storage code that is
//! independent of the Rust identifier, so renaming a variant never changes
//! what is written to the database.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be claimed
    Queued,
    /// Claimed by a worker and locked
    Executing,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully, no further attempts
    Failed,
    /// Cancelled before execution
    Cancelled,
    /// Parked; not eligible for claiming until unsuspended
    Suspended,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Queued,
        Self::Executing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Suspended,
    ];

    /// Stable storage code
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Suspended => "SUSPENDED",
        }
    }

    /// Terminal states are archived and never claimed again
    pub fn is_terminal(&self) -> bool {
        status_groups::TERMINAL.contains(self)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Executing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.code() == s)
            .ok_or_else(|| format!("Invalid task status: {s}"))
    }
}

/// Claim-ordering priority. Lower codes are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl TaskPriority {
    /// Stable storage code
    pub const fn code(&self) -> i16 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
            Self::Background => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Critical),
            1 => Some(Self::High),
            2 => Some(Self::Normal),
            3 => Some(Self::Low),
            4 => Some(Self::Background),
            _ => None,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        };
        f.write_str(name)
    }
}

/// Kinds of audit records appended to `task_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventType {
    Submitted,
    Claimed,
    Completed,
    Failed,
    Delayed,
    StepAdvanced,
    Cancelled,
    Suspended,
    Unsuspended,
    Recovered,
}

impl TaskEventType {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Claimed => "CLAIMED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Delayed => "DELAYED",
            Self::StepAdvanced => "STEP_ADVANCED",
            Self::Cancelled => "CANCELLED",
            Self::Suspended => "SUSPENDED",
            Self::Unsuspended => "UNSUSPENDED",
            Self::Recovered => "RECOVERED",
        }
    }
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TaskEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event = match s {
            "SUBMITTED" => Self::Submitted,
            "CLAIMED" => Self::Claimed,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "DELAYED" => Self::Delayed,
            "STEP_ADVANCED" => Self::StepAdvanced,
            "CANCELLED" => Self::Cancelled,
            "SUSPENDED" => Self::Suspended,
            "UNSUSPENDED" => Self::Unsuspended,
            "RECOVERED" => Self::Recovered,
            _ => return Err(format!("Invalid task event type: {s}")),
        };
        Ok(event)
    }
}

pub mod status_groups {
    use super::TaskStatus;

    /// States the archiver collects
    pub const TERMINAL: [TaskStatus; 3] = [
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub const CANCELLABLE: [TaskStatus; 3] = [
        TaskStatus::Queued,
        TaskStatus::Suspended,
        TaskStatus::Cancelled,
    ];

    pub const SUSPENDABLE: [TaskStatus; 2] = [TaskStatus::Queued, TaskStatus::Suspended];

    pub const UNSUSPENDABLE: [TaskStatus; 1] = [TaskStatus::Suspended];
}

pub mod system {
    /// Prefix of external references generated by the recurring scheduler
    pub const RECURRING_REFERENCE_PREFIX: &str = "recurring";

    /// Upper bound on a single listing page
    pub const MAX_PAGE_SIZE: u32 = 1000;

    pub const DEFAULT_PAGE_SIZE: u32 = 50;

    /// Maximum accepted length of a task type code
    pub const MAX_TASK_TYPE_LENGTH: usize = 128;

    /// Maximum accepted length of an external reference
    pub const MAX_EXTERNAL_REFERENCE_LENGTH: usize = 255;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.code().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(!TaskStatus::Suspended.is_terminal());
    }

    #[test]
    fn test_priority_ordering_follows_codes() {
        assert!(TaskPriority::Critical < TaskPriority::Normal);
        assert!(TaskPriority::Critical.code() < TaskPriority::Background.code());
        assert_eq!(TaskPriority::from_code(3), Some(TaskPriority::Low));
        assert_eq!(TaskPriority::from_code(9), None);
    }

    #[test]
    fn test_status_serde_uses_storage_code() {
        let json = serde_json::to_string(&TaskStatus::Suspended).unwrap();
        assert_eq!(json, "\"SUSPENDED\"");
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(
            "STEP_ADVANCED".parse::<TaskEventType>().unwrap(),
            TaskEventType::StepAdvanced
        );
    }
}
