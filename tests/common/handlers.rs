use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use taskforge_core::config::BackoffConfig;
use taskforge_core::orchestration::{HandlerError, TaskContext, TaskHandler, TaskOutcome};

/// Counts invocations and completes.
#[derive(Default)]
pub struct CountingHandler {
    pub calls: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutcome::completed())
    }
}

/// Fails transiently every time, recording the attempt numbers it saw.
#[derive(Default)]
pub struct AlwaysTransient {
    pub attempts: Arc<parking_lot::Mutex<Vec<i32>>>,
    pub policy: Option<BackoffConfig>,
}

#[async_trait]
impl TaskHandler for AlwaysTransient {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
        self.attempts.lock().push(ctx.attempt());
        Err(anyhow::anyhow!("upstream timed out").into())
    }

    fn retry_policy(&self) -> Option<BackoffConfig> {
        self.policy.clone()
    }
}

pub struct AlwaysTerminal;

#[async_trait]
impl TaskHandler for AlwaysTerminal {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
        Err(HandlerError::terminal("recipient address rejected"))
    }
}

pub struct Panicking;

#[async_trait]
impl TaskHandler for Panicking {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
        panic!("handler bug")
    }
}

/// Walks `fetch -> transform -> load`, accumulating visited steps in `data`.
pub struct EtlPipeline;

#[async_trait]
impl TaskHandler for EtlPipeline {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
        let mut visited: Vec<String> = ctx
            .data()
            .and_then(|data| data.get("visited"))
            .and_then(|visited| serde_json::from_value(visited.clone()).ok())
            .unwrap_or_default();
        let step = ctx.step().unwrap_or_default().to_string();
        visited.push(step.clone());

        match step.as_str() {
            "fetch" => Ok(TaskOutcome::next_step_with(
                "transform",
                json!({ "visited": visited }),
            )),
            "transform" => Ok(TaskOutcome::next_step_with(
                "load",
                json!({ "visited": visited }),
            )),
            "load" => Ok(TaskOutcome::completed_with(json!({ "visited": visited }))),
            other => Err(HandlerError::terminal(format!("unknown step {other}"))),
        }
    }
}

/// Asks for a next step regardless of the task's shape.
pub struct AlwaysNextStep;

#[async_trait]
impl TaskHandler for AlwaysNextStep {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutcome, HandlerError> {
        Ok(TaskOutcome::next_step("again"))
    }
}
