//! # Archival Service
//!
//! Moves terminal tasks (COMPLETED, FAILED, CANCELLED) whose `executed`
//! timestamp is older than the retention window out of the live table.
//! Each batch copies rows into the archive before deleting them, and the
//! delete only removes rows whose copy exists, so an interrupted batch can
//! leave a duplicate copy but never loses a task.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::config::ArchiveConfig;
use crate::database::TaskStore;
use crate::error::Result;
use crate::metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchivalStats {
    pub archived: u64,
    pub batches: u32,
}

pub struct ArchivalService {
    store: Arc<dyn TaskStore>,
    config: ArchiveConfig,
}

impl std::fmt::Debug for ArchivalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivalService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ArchivalService {
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, config: ArchiveConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval_timer = interval(self.config.interval());

        info!(
            interval_seconds = self.config.interval_seconds,
            retention_hours = self.config.retention_hours,
            batch_size = self.config.batch_size,
            "Starting archival service"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval_timer.tick() => {}
            }

            let start = Instant::now();
            match self.archive_once(Utc::now()).await {
                Ok(stats) => {
                    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                    metrics::sweep_duration()
                        .record(duration_ms, &[KeyValue::new("sweep", "archiver")]);

                    if stats.archived > 0 {
                        info!(
                            archived = stats.archived,
                            batches = stats.batches,
                            duration_ms = duration_ms,
                            "Archival sweep completed"
                        );
                    } else {
                        debug!("No tasks eligible for archival");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Archival sweep failed");
                }
            }
        }

        info!("Archival service stopped");
    }

    /// Archive everything past retention, one batch at a time, stopping at
    /// the first short batch.
    #[instrument(skip(self))]
    pub async fn archive_once(&self, now: DateTime<Utc>) -> Result<ArchivalStats> {
        let cutoff = now - self.config.retention();
        let mut stats = ArchivalStats::default();

        loop {
            let archived = self
                .store
                .archive_tasks(cutoff, self.config.batch_size, now)
                .await?;
            stats.batches += 1;
            stats.archived += archived;

            debug!(batch = stats.batches, archived = archived, cutoff = %cutoff, "Archived batch");

            if archived < u64::from(self.config.batch_size) {
                break;
            }
        }

        if stats.archived > 0 {
            metrics::tasks_archived_total().add(stats.archived, &[]);
        }
        Ok(stats)
    }
}
