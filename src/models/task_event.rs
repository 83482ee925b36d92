//! Append-only audit records, one per applied transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::constants::TaskEventType;
use crate::error::{Result, TaskforgeError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub event_type: TaskEventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

impl TaskEvent {
    pub fn new(task_id: Uuid, event_type: TaskEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            task_id,
            event_type,
            timestamp,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskEventRow {
    pub task_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

impl TryFrom<TaskEventRow> for TaskEvent {
    type Error = TaskforgeError;

    fn try_from(row: TaskEventRow) -> Result<Self> {
        Ok(Self {
            task_id: row.task_id,
            event_type: row
                .event_type
                .parse()
                .map_err(TaskforgeError::StoreUnavailable)?,
            timestamp: row.timestamp,
            payload: row.payload,
        })
    }
}
