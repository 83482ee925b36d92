#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskforge Core
//!
//! Durable, database-backed task execution engine.
//!
//! ## Overview
//!
//! Callers submit tasks (a type code plus a JSON payload) to a shared store.
//! Worker loops claim eligible tasks under row locks, run the handler
//! registered for the task type and record the outcome. Background sweeps
//! recover tasks abandoned by crashed workers and archive finished ones. A
//! cron-like [`scheduling::SchedulingPattern`] drives recurring submissions.
//!
//! ## Module Organization
//!
//! - [`scheduling`] - Scheduling pattern parser and matcher
//! - [`models`] - Task, event, task type and archive records
//! - [`state_machine`] - Transition definitions and their guards
//! - [`database`] - The [`database::TaskStore`] contract with PostgreSQL and in-memory stores
//! - [`orchestration`] - Lifecycle API, workers, reaper, archiver, recurring scheduler, bootstrap
//! - [`config`] - Layered configuration
//! - [`logging`] / [`metrics`] - Structured logs and OpenTelemetry instruments
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use taskforge_core::config::ConfigManager;
//! use taskforge_core::database::PgTaskStore;
//! use taskforge_core::models::NewTask;
//! use taskforge_core::orchestration::{
//!     EngineBootstrap, HandlerError, HandlerRegistry, TaskContext, TaskHandler, TaskOutcome,
//! };
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl TaskHandler for SendEmail {
//!     async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
//!         Ok(TaskOutcome::completed())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! taskforge_core::logging::init_structured_logging(&manager.config().logging);
//!
//! let store = Arc::new(PgTaskStore::connect(&manager.config().database).await?);
//! let mut registry = HandlerRegistry::new();
//! registry.register("email.send", Arc::new(SendEmail))?;
//!
//! let engine = EngineBootstrap::start(store, registry, manager.config().clone()).await?;
//! let task_id = engine
//!     .lifecycle()
//!     .submit(NewTask::new("email.send").with_data(serde_json::json!({"to": "ops@example.com"})))
//!     .await?;
//! println!("submitted {task_id}");
//!
//! engine.shutdown_and_join().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod scheduling;
pub mod state_machine;

pub use config::{ConfigManager, EngineConfig};
pub use constants::{status_groups, system, TaskEventType, TaskPriority, TaskStatus};
pub use database::{InMemoryTaskStore, PgTaskStore, TaskStore};
pub use error::{Result, TaskforgeError};
pub use models::{NewTask, Task, TaskEvent, TaskFilter, TaskPage, PageRequest};
pub use orchestration::{
    EngineBootstrap, EngineHandle, HandlerError, HandlerRegistry, TaskContext, TaskHandler,
    TaskLifecycle, TaskOutcome, TransitionOutcome,
};
pub use scheduling::SchedulingPattern;
