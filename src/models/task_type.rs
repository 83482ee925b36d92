//! Registered task kinds.
//!
//! Disabling a type removes all of its tasks from claim eligibility without
//! touching the rows themselves.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::constants::system;
use crate::error::{Result, TaskforgeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaskTypeDefinition {
    pub code: String,
    pub enabled: bool,
    /// Upper bound on simultaneously EXECUTING tasks of this type
    pub max_concurrency: Option<i32>,
    pub description: Option<String>,
}

impl TaskTypeDefinition {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            enabled: true,
            max_concurrency: None,
            description: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_max_concurrency(mut self, limit: i32) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() || self.code.len() > system::MAX_TASK_TYPE_LENGTH {
            return Err(TaskforgeError::InvalidArgument(format!(
                "task type code must be 1..={} characters",
                system::MAX_TASK_TYPE_LENGTH
            )));
        }
        if matches!(self.max_concurrency, Some(limit) if limit < 1) {
            return Err(TaskforgeError::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether another task of this type may start given `executing` in flight.
    pub fn has_capacity(&self, executing: usize) -> bool {
        self.max_concurrency
            .map_or(true, |limit| executing < limit as usize)
    }
}
