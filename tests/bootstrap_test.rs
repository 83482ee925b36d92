//! Starting and stopping a full engine against the in-memory store.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use taskforge_core::config::EngineConfig;
use taskforge_core::constants::TaskStatus;
use taskforge_core::database::{InMemoryTaskStore, TaskStore};
use taskforge_core::models::NewTask;
use taskforge_core::orchestration::{EngineBootstrap, HandlerRegistry};
use taskforge_core::TaskforgeError;
use tokio_test::{assert_err, assert_ok};

use common::*;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.worker.pool_size = 2;
    config.worker.poll_interval_ms = 10;
    config.retry = immediate_retry(3);
    config
}

#[tokio::test]
async fn test_engine_processes_submitted_tasks() {
    let store = Arc::new(InMemoryTaskStore::new());
    let (handler, calls) = CountingHandler::new();
    let mut registry = HandlerRegistry::new();
    registry.register("email.send", Arc::new(handler)).unwrap();

    let engine = EngineBootstrap::start(store.clone(), registry, fast_config())
        .await
        .unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.status().worker_ids, vec!["taskforge-0", "taskforge-1"]);

    // handled types are registered on start
    let types = assert_ok!(store.task_types().await);
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].code, "email.send");

    let lifecycle = engine.lifecycle();
    let id = lifecycle.submit(NewTask::new("email.send")).await.unwrap();

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        while lifecycle.status(id).await.unwrap() != TaskStatus::Completed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(completed.is_ok(), "task was not executed");

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown_and_join())
        .await
        .expect("engine stops promptly");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut engine = EngineBootstrap::start(store, HandlerRegistry::new(), fast_config())
        .await
        .unwrap();

    engine.shutdown();
    engine.shutdown();
    assert!(!engine.is_running());
    assert!(!engine.status().running);

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown_and_join())
        .await
        .expect("engine stops promptly");
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let mut config = fast_config();
    config.worker.pool_size = 0;

    let result =
        EngineBootstrap::start(Arc::new(InMemoryTaskStore::new()), HandlerRegistry::new(), config)
            .await;
    let err = assert_err!(result);
    assert!(matches!(err, TaskforgeError::Configuration(_)));
}

#[tokio::test]
async fn test_recurring_pattern_errors_fail_start() {
    let mut config = fast_config();
    config.recurring.enabled = true;
    config.recurring.jobs.push(taskforge_core::config::RecurringJobConfig {
        name: "broken".to_string(),
        pattern: "* * * *".to_string(),
        task_type: "report.build".to_string(),
        priority: Default::default(),
        data: None,
    });

    let result =
        EngineBootstrap::start(Arc::new(InMemoryTaskStore::new()), HandlerRegistry::new(), config)
            .await;
    assert!(result.is_err());
}
