//! # Orchestration
//!
//! The moving parts of the engine built on top of a [`TaskStore`](crate::database::TaskStore):
//!
//! - [`lifecycle`]: submission, queries and administrative transitions
//! - [`handler`]: the handler contract and the type-to-handler registry
//! - [`retry`]: backoff and attempt-limit decisions
//! - [`worker`]: claim loops and the worker pool
//! - [`reaper`]: recovery of tasks whose worker disappeared
//! - [`archiver`]: retention sweep into the archive
//! - [`recurring`]: pattern-driven task submission
//! - [`bootstrap`]: starting and stopping all of the above

pub mod archiver;
pub mod bootstrap;
pub mod handler;
pub mod lifecycle;
pub mod reaper;
pub mod recurring;
pub mod retry;
pub mod worker;

pub use archiver::{ArchivalService, ArchivalStats};
pub use bootstrap::{EngineBootstrap, EngineHandle, EngineStatus};
pub use handler::{HandlerError, HandlerRegistry, TaskContext, TaskHandler, TaskOutcome};
pub use lifecycle::{TaskLifecycle, TransitionOutcome};
pub use reaper::HungTaskReaper;
pub use recurring::{RecurringJob, RecurringScheduler};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{ExecutionResult, TaskWorker, WorkerPool};
