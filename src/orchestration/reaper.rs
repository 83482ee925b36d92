//! # Hung Task Reaper
//!
//! Background sweep returning tasks stuck in EXECUTING past the lease
//! timeout to QUEUED. Such tasks belong to a worker that crashed or lost its
//! store connection mid-execution. The attempt counter is left as is, so the
//! interrupted attempt still counts against the retry limit.
//!
//! The reset is conditional on the task still being EXECUTING with a lock
//! older than the cutoff, so a task that completes while a sweep is running
//! is never touched.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::ReaperConfig;
use crate::database::TaskStore;
use crate::error::{Result, TaskforgeError};
use crate::metrics;

pub struct HungTaskReaper {
    store: Arc<dyn TaskStore>,
    config: ReaperConfig,
}

impl std::fmt::Debug for HungTaskReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HungTaskReaper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HungTaskReaper {
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Sweep on the configured interval until shutdown. A failed sweep is
    /// logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval_timer = interval(self.config.interval());

        info!(
            interval_seconds = self.config.interval_seconds,
            lease_timeout_seconds = self.config.lease_timeout_seconds,
            task_type = ?self.config.task_type,
            "Starting hung task reaper"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval_timer.tick() => {}
            }

            let start = Instant::now();
            match self.reap_once(Utc::now()).await {
                Ok(recovered) => {
                    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                    metrics::sweep_duration()
                        .record(duration_ms, &[KeyValue::new("sweep", "reaper")]);

                    if recovered.is_empty() {
                        debug!("No hung tasks detected this cycle");
                    } else {
                        info!(
                            recovered = recovered.len(),
                            duration_ms = duration_ms,
                            "Hung task sweep completed"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "Hung task sweep failed");
                }
            }
        }

        info!("Hung task reaper stopped");
    }

    /// Requeue every task locked before `now - lease_timeout`.
    #[instrument(skip(self))]
    pub async fn reap_once(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let lease = chrono::Duration::from_std(self.config.lease_timeout()).map_err(|e| {
            TaskforgeError::Configuration(format!("lease timeout out of range: {e}"))
        })?;
        let locked_before = now - lease;

        let recovered = self
            .store
            .requeue_hung_tasks(locked_before, self.config.task_type.as_deref(), now)
            .await?;

        for task_id in &recovered {
            debug!(task_id = %task_id, locked_before = %locked_before, "Recovered hung task");
        }
        if !recovered.is_empty() {
            let label = self
                .config
                .task_type
                .clone()
                .unwrap_or_else(|| "all".to_string());
            metrics::hung_tasks_recovered_total()
                .add(recovered.len() as u64, &metrics::task_type_label(&label));
        }

        Ok(recovered)
    }
}
