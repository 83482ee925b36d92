//! # Engine Metrics
//!
//! OpenTelemetry instruments for the task lifecycle. Instruments come from
//! the global meter provider; the crate never installs an exporter, so
//! recording is a no-op until the host application sets one up.
//!
//! ## Usage
//!
//! ```rust
//! use opentelemetry::KeyValue;
//! use taskforge_core::metrics;
//!
//! metrics::tasks_submitted_total().add(1, &[KeyValue::new("task_type", "email.send")]);
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static ENGINE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    ENGINE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("taskforge-engine"))
}

/// Common `task_type` label
pub fn task_type_label(task_type: &str) -> [KeyValue; 1] {
    [KeyValue::new("task_type", task_type.to_string())]
}

// Counters

/// Tasks accepted by `submit`
///
/// Labels:
/// - task_type
pub fn tasks_submitted_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.submitted.total")
        .with_description("Total number of tasks submitted")
        .build()
}

/// Tasks locked for execution by a worker
///
/// Labels:
/// - task_type
pub fn tasks_claimed_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.claimed.total")
        .with_description("Total number of task claims")
        .build()
}

pub fn tasks_completed_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.completed.total")
        .with_description("Total number of tasks completed successfully")
        .build()
}

/// Tasks moved to terminal FAILED
///
/// Labels:
/// - task_type
/// - reason: terminal, attempts_exhausted, no_handler
pub fn tasks_failed_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.failed.total")
        .with_description("Total number of tasks that failed terminally")
        .build()
}

pub fn tasks_retried_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.retried.total")
        .with_description("Total number of transient failures requeued for retry")
        .build()
}

pub fn steps_advanced_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.steps_advanced.total")
        .with_description("Total number of multi-step tasks advanced to their next step")
        .build()
}

pub fn hung_tasks_recovered_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.recovered.total")
        .with_description("Total number of hung tasks returned to the queue")
        .build()
}

pub fn tasks_archived_total() -> Counter<u64> {
    meter()
        .u64_counter("taskforge.tasks.archived.total")
        .with_description("Total number of terminal tasks moved to the archive")
        .build()
}

// Histograms

/// Handler wall-clock duration in milliseconds
///
/// Labels:
/// - task_type
/// - outcome: completed, next_step, transient, terminal
pub fn handler_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("taskforge.handler.duration")
        .with_description("Handler execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Background sweep duration in milliseconds
///
/// Labels:
/// - sweep: reaper, archiver
pub fn sweep_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("taskforge.sweep.duration")
        .with_description("Background sweep duration in milliseconds")
        .with_unit("ms")
        .build()
}
