//! # Recurring Scheduler
//!
//! Submits tasks for configured recurring jobs whenever a job's
//! [`SchedulingPattern`] matches the current minute, evaluated in a fixed UTC
//! offset.
//!
//! Each submission carries the external reference
//! `recurring:<job>:<YYYYMMDDHHMM>` (UTC minute). When several engine nodes
//! run the scheduler, the first submission for a minute wins and the others
//! are rejected by the store's uniqueness check.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::lifecycle::TaskLifecycle;
use crate::config::{RecurringConfig, RecurringJobConfig};
use crate::constants::system::RECURRING_REFERENCE_PREFIX;
use crate::constants::TaskPriority;
use crate::error::{Result, TaskforgeError};
use crate::models::NewTask;
use crate::scheduling::SchedulingPattern;

#[derive(Debug, Clone, PartialEq)]
pub struct RecurringJob {
    pub name: String,
    pub pattern: SchedulingPattern,
    pub task_type: String,
    pub priority: TaskPriority,
    pub data: Option<Value>,
}

impl RecurringJob {
    pub fn new(name: impl Into<String>, pattern: SchedulingPattern, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern,
            task_type: task_type.into(),
            priority: TaskPriority::default(),
            data: None,
        }
    }

    pub fn from_config(config: &RecurringJobConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            pattern: SchedulingPattern::parse(&config.pattern)?,
            task_type: config.task_type.clone(),
            priority: config.priority,
            data: config.data.clone(),
        })
    }

    /// Idempotency key for the run at `minute`
    pub fn external_reference(&self, minute: DateTime<Utc>) -> String {
        format!(
            "{RECURRING_REFERENCE_PREFIX}:{}:{}",
            self.name,
            minute.format("%Y%m%d%H%M")
        )
    }

    fn to_new_task(&self, minute: DateTime<Utc>) -> NewTask {
        let mut task = NewTask::new(self.task_type.clone())
            .with_priority(self.priority)
            .with_external_reference(self.external_reference(minute));
        if let Some(data) = &self.data {
            task = task.with_data(data.clone());
        }
        task
    }
}

pub struct RecurringScheduler {
    lifecycle: Arc<TaskLifecycle>,
    jobs: Vec<RecurringJob>,
    offset: FixedOffset,
}

impl std::fmt::Debug for RecurringScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurringScheduler")
            .field("jobs", &self.jobs)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl RecurringScheduler {
    pub fn new(lifecycle: Arc<TaskLifecycle>, jobs: Vec<RecurringJob>, offset: FixedOffset) -> Self {
        Self {
            lifecycle,
            jobs,
            offset,
        }
    }

    pub fn from_config(lifecycle: Arc<TaskLifecycle>, config: &RecurringConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            TaskforgeError::Configuration(format!(
                "invalid utc offset: {} minutes",
                config.utc_offset_minutes
            ))
        })?;
        let jobs = config
            .jobs
            .iter()
            .map(RecurringJob::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(lifecycle, jobs, offset))
    }

    pub fn jobs(&self) -> &[RecurringJob] {
        &self.jobs
    }

    /// Submit a task for every job matching the minute containing `instant`.
    /// Returns the ids of tasks this call created.
    #[instrument(skip(self), fields(jobs = self.jobs.len()))]
    pub async fn fire(&self, instant: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let minute = truncate_to_minute(instant);
        let mut submitted = Vec::new();

        for job in self.jobs.iter().filter(|job| job.pattern.matches(&self.offset, minute)) {
            match self.lifecycle.submit(job.to_new_task(minute)).await {
                Ok(task_id) => {
                    info!(job = %job.name, task_id = %task_id, minute = %minute, "Recurring job fired");
                    submitted.push(task_id);
                }
                Err(TaskforgeError::DuplicateExternalReference(_)) => {
                    debug!(job = %job.name, minute = %minute, "Recurring job already fired");
                }
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(job = %job.name, error = %e, "Recurring job submission rejected");
                }
            }
        }

        Ok(submitted)
    }

    /// Fire once per minute boundary until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            jobs = self.jobs.len(),
            offset = %self.offset,
            "Starting recurring scheduler"
        );

        let mut backlog = FireBacklog::default();
        loop {
            let now = Utc::now();
            let next_minute = truncate_to_minute(now) + Duration::minutes(1);
            let wait = (next_minute - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            for minute in backlog.due(truncate_to_minute(Utc::now())) {
                match self.fire(minute).await {
                    Ok(_) => backlog.fired(minute),
                    Err(e) => {
                        warn!(minute = %minute, error = %e, "Recurring scheduler tick failed");
                        backlog.failed(minute);
                    }
                }
            }
        }

        info!("Recurring scheduler stopped");
    }
}

/// Minutes the run loop still owes a `fire` call. A minute whose tick failed
/// is retried on the following ticks; submissions are idempotent per minute.
#[derive(Debug, Default)]
struct FireBacklog {
    last_fired: Option<DateTime<Utc>>,
    failed: VecDeque<DateTime<Utc>>,
}

impl FireBacklog {
    const MAX_FAILED_MINUTES: usize = 60;

    /// Drain retries, oldest first, followed by `minute` unless it already fired.
    fn due(&mut self, minute: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut due: Vec<_> = self.failed.drain(..).collect();
        if self.last_fired != Some(minute) && !due.contains(&minute) {
            due.push(minute);
        }
        due
    }

    fn fired(&mut self, minute: DateTime<Utc>) {
        self.last_fired = self.last_fired.max(Some(minute));
    }

    fn failed(&mut self, minute: DateTime<Utc>) {
        if self.failed.len() == Self::MAX_FAILED_MINUTES {
            if let Some(dropped) = self.failed.pop_front() {
                warn!(minute = %dropped, "Giving up on recurring minute");
            }
        }
        self.failed.push_back(minute);
    }
}

fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = instant.timestamp();
    DateTime::from_timestamp(seconds - seconds.rem_euclid(60), 0).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_external_reference_uses_utc_minute() {
        let job = RecurringJob::new(
            "nightly",
            SchedulingPattern::parse("0 2 * * *").unwrap(),
            "report.build",
        );
        let minute = Utc.with_ymd_and_hms(2025, 3, 9, 2, 0, 0).unwrap();
        assert_eq!(job.external_reference(minute), "recurring:nightly:202503090200");
    }

    #[test]
    fn test_backlog_retries_failed_minute() {
        let first = Utc.with_ymd_and_hms(2025, 3, 9, 2, 0, 0).unwrap();
        let second = first + Duration::minutes(1);
        let mut backlog = FireBacklog::default();

        assert_eq!(backlog.due(first), vec![first]);
        backlog.failed(first);

        // same minute again after a failure: still owed
        assert_eq!(backlog.due(first), vec![first]);
        backlog.failed(first);

        assert_eq!(backlog.due(second), vec![first, second]);
        backlog.fired(first);
        backlog.fired(second);

        assert!(backlog.due(second).is_empty());
    }

    #[test]
    fn test_backlog_is_bounded() {
        let start = Utc.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap();
        let mut backlog = FireBacklog::default();
        for n in 0..90 {
            backlog.failed(start + Duration::minutes(n));
        }

        let due = backlog.due(start + Duration::minutes(90));
        assert_eq!(due.len(), FireBacklog::MAX_FAILED_MINUTES + 1);
        assert_eq!(due[0], start + Duration::minutes(30));
    }

    #[test]
    fn test_truncate_to_minute() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 9, 2, 7, 41).unwrap()
            + Duration::milliseconds(250);
        assert_eq!(
            truncate_to_minute(instant),
            Utc.with_ymd_and_hms(2025, 3, 9, 2, 7, 0).unwrap()
        );
    }

    #[test]
    fn test_from_config_rejects_bad_pattern() {
        let lifecycle = Arc::new(TaskLifecycle::new(Arc::new(
            crate::database::InMemoryTaskStore::new(),
        )));
        let config = RecurringConfig {
            enabled: true,
            utc_offset_minutes: 0,
            jobs: vec![RecurringJobConfig {
                name: "broken".to_string(),
                pattern: "* * 32 * *".to_string(),
                task_type: "t".to_string(),
                priority: TaskPriority::Normal,
                data: None,
            }],
        };
        assert!(matches!(
            RecurringScheduler::from_config(lifecycle, &config),
            Err(TaskforgeError::Pattern(_))
        ));
    }
}
