//! # Engine Bootstrap
//!
//! Starts every background component of the engine against one store:
//!
//! - the worker pool (`worker.pool_size` claim loops)
//! - the hung task reaper, when `reaper.enabled`
//! - the archival service, when `archive.enabled`
//! - the recurring scheduler, when `recurring.enabled` and jobs are configured
//!
//! All components listen on one broadcast shutdown channel held by the
//! returned [`EngineHandle`].

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::archiver::ArchivalService;
use super::handler::HandlerRegistry;
use super::lifecycle::TaskLifecycle;
use super::reaper::HungTaskReaper;
use super::recurring::RecurringScheduler;
use super::worker::WorkerPool;
use crate::config::EngineConfig;
use crate::database::TaskStore;
use crate::error::Result;
use crate::models::TaskTypeDefinition;

/// Handle to a running engine
pub struct EngineHandle {
    lifecycle: Arc<TaskLifecycle>,
    /// Some while running, None once shutdown has been signalled
    shutdown_sender: Option<broadcast::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
    status: EngineStatus,
}

/// Snapshot of what the bootstrap started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub running: bool,
    pub worker_ids: Vec<String>,
    pub reaper_enabled: bool,
    pub archiver_enabled: bool,
    pub recurring_jobs: usize,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Submission and administration API bound to the engine's store
    pub fn lifecycle(&self) -> Arc<TaskLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            ..self.status.clone()
        }
    }

    /// Signal every component to stop. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            // No receivers only means every component already exited
            let _ = sender.send(());
            info!("Engine shutdown requested");
        }
    }

    /// Signal shutdown and wait for every component to exit. In-flight
    /// handler invocations finish first. A component that panicked is
    /// logged and does not stop the others from being joined.
    pub async fn shutdown_and_join(mut self) {
        self.shutdown();

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Engine component terminated abnormally");
            }
        }

        info!("Engine stopped");
    }
}

pub struct EngineBootstrap;

impl EngineBootstrap {
    /// Validate the configuration, make sure every handled task type is
    /// registered, then spawn the engine components.
    pub async fn start(
        store: Arc<dyn TaskStore>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Result<EngineHandle> {
        config.validate()?;

        info!(
            pool_size = config.worker.pool_size,
            handlers = registry.len(),
            "Bootstrapping task engine"
        );

        if registry.is_empty() {
            warn!("No task handlers registered; workers will stay idle");
        }

        let lifecycle = Arc::new(TaskLifecycle::new(Arc::clone(&store)));
        Self::register_handled_types(&lifecycle, &registry).await?;

        let recurring = if config.recurring.enabled && !config.recurring.jobs.is_empty() {
            Some(RecurringScheduler::from_config(
                Arc::clone(&lifecycle),
                &config.recurring,
            )?)
        } else {
            None
        };

        let (shutdown_sender, _) = broadcast::channel::<()>(1);
        let registry = Arc::new(registry);

        let pool = WorkerPool::new(
            Arc::clone(&store),
            registry,
            config.retry.clone(),
            config.worker.clone(),
        );
        let worker_ids = pool
            .workers()
            .iter()
            .map(|worker| worker.worker_id().to_string())
            .collect();
        let mut handles = pool.spawn(&shutdown_sender);

        if config.reaper.enabled {
            let reaper = HungTaskReaper::new(Arc::clone(&store), config.reaper.clone());
            let receiver = shutdown_sender.subscribe();
            handles.push(tokio::spawn(async move { reaper.run(receiver).await }));
        }

        if config.archive.enabled {
            let archiver = ArchivalService::new(Arc::clone(&store), config.archive.clone());
            let receiver = shutdown_sender.subscribe();
            handles.push(tokio::spawn(async move { archiver.run(receiver).await }));
        }

        let recurring_jobs = recurring.as_ref().map_or(0, |scheduler| scheduler.jobs().len());
        if let Some(scheduler) = recurring {
            let receiver = shutdown_sender.subscribe();
            handles.push(tokio::spawn(async move { scheduler.run(receiver).await }));
        }

        let status = EngineStatus {
            running: true,
            worker_ids,
            reaper_enabled: config.reaper.enabled,
            archiver_enabled: config.archive.enabled,
            recurring_jobs,
        };
        info!(components = handles.len(), status = ?status, "Task engine started");

        Ok(EngineHandle {
            lifecycle,
            shutdown_sender: Some(shutdown_sender),
            handles,
            status,
        })
    }

    /// Types with a handler but no registry row are registered enabled with
    /// no concurrency limit. Existing rows are left as they are.
    async fn register_handled_types(
        lifecycle: &TaskLifecycle,
        registry: &HandlerRegistry,
    ) -> Result<()> {
        let known: Vec<String> = lifecycle
            .task_types()
            .await?
            .into_iter()
            .map(|definition| definition.code)
            .collect();

        for task_type in registry.task_types() {
            if !known.contains(&task_type) {
                info!(task_type = %task_type, "Registering task type for handler");
                lifecycle
                    .register_task_type(TaskTypeDefinition::new(task_type))
                    .await?;
            }
        }
        Ok(())
    }
}
