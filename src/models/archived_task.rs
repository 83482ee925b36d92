//! Write-once copies of terminal tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::task::{Task, TaskRow};
use crate::error::{Result, TaskforgeError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTask {
    #[serde(flatten)]
    pub task: Task,
    pub archived: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ArchivedTaskRow {
    #[sqlx(flatten)]
    pub task: TaskRow,
    pub archived: DateTime<Utc>,
}

impl TryFrom<ArchivedTaskRow> for ArchivedTask {
    type Error = TaskforgeError;

    fn try_from(row: ArchivedTaskRow) -> Result<Self> {
        Ok(Self {
            task: Task::try_from(row.task)?,
            archived: row.archived,
        })
    }
}
