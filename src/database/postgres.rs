//! # PostgreSQL Task Store
//!
//! Every lifecycle operation is one statement (or one short transaction)
//! whose `WHERE` clause carries the transition's precondition, so a lost
//! race simply affects zero rows. Audit events are appended by a
//! data-modifying CTE in the same statement as the transition they record.
//!
//! ## Claiming
//!
//! Claims select candidates with `FOR UPDATE OF t SKIP LOCKED` and flip them
//! to EXECUTING inside the same transaction, so concurrent workers never
//! block on or double-claim a row. The per-type `max_concurrency` check is
//! evaluated against committed EXECUTING rows and is therefore a soft limit
//! under concurrent claimers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::migrator::MIGRATOR;
use super::store::TaskStore;
use crate::config::DatabaseConfig;
use crate::constants::{status_groups, TaskStatus};
use crate::error::{Result, TaskforgeError};
use crate::models::{
    ArchivedTask, ArchivedTaskRow, PageRequest, Task, TaskEvent, TaskEventRow, TaskFilter,
    TaskPage, TaskRow, TaskTypeDefinition, TASK_COLUMNS,
};
use crate::state_machine::TaskTransition;

/// Convert a driver error, logging it when it is an infrastructure failure.
fn store_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> TaskforgeError {
    move |e| {
        let err = TaskforgeError::from(e);
        if matches!(err, TaskforgeError::StoreUnavailable(_)) {
            error!(operation, error = %err, "Task store operation failed");
        }
        err
    }
}

fn codes(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|status| status.code().to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and optionally apply embedded migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(store_error("connect"))?;

        let store = Self::new(pool);
        if config.run_migrations {
            store.run_migrations().await?;
        }
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running task store migrations");
        MIGRATOR.run(&self.pool).await?;
        info!("Task store migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool> {
        let health: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(store_error("health_check"))?;
        Ok(health == 1)
    }

    /// Cancel, suspend or unsuspend one task. Self-transitions match the
    /// row but update nothing and record no event.
    async fn status_transition(
        &self,
        id: Uuid,
        transition: TaskTransition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r#"
            WITH target AS (
                SELECT id, status FROM tasks
                WHERE id = $1 AND status = ANY($2)
                FOR UPDATE
            ), updated AS (
                UPDATE tasks t
                SET status = $3, next_execution = $6, locked = NULL, lock_name = NULL,
                    executed = COALESCE($7, t.executed)
                FROM target
                WHERE t.id = target.id AND target.status <> $3
                RETURNING t.id
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, $4, $5, NULL FROM updated
            )
            SELECT id FROM target
        "#;

        let matched: Option<Uuid> = sqlx::query_scalar(query)
            .bind(id)
            .bind(codes(transition.allowed_from()))
            .bind(transition.target_status().code())
            .bind(transition.event_type().code())
            .bind(now)
            .bind(Self::requeue_time(&transition, now))
            .bind(Self::executed_time(&transition, now))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error(transition.name()))?;

        debug!(task_id = %id, transition = transition.name(), applied = matched.is_some(), "Status transition");
        Ok(matched.is_some())
    }

    async fn batch_transition(
        &self,
        batch_id: &str,
        transition: TaskTransition,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r#"
            WITH updated AS (
                UPDATE tasks
                SET status = $3, next_execution = $6, locked = NULL, lock_name = NULL,
                    executed = COALESCE($7, executed)
                WHERE batch_id = $1 AND status = ANY($2) AND status <> $3
                RETURNING id
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, $4, $5, NULL FROM updated
            )
            SELECT COUNT(*) FROM updated
        "#;

        let count: i64 = sqlx::query_scalar(query)
            .bind(batch_id)
            .bind(codes(transition.allowed_from()))
            .bind(transition.target_status().code())
            .bind(transition.event_type().code())
            .bind(now)
            .bind(Self::requeue_time(&transition, now))
            .bind(Self::executed_time(&transition, now))
            .fetch_one(&self.pool)
            .await
            .map_err(store_error(transition.name()))?;

        info!(batch_id, transition = transition.name(), count, "Batch transition applied");
        Ok(count as u64)
    }

    fn requeue_time(transition: &TaskTransition, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        matches!(transition, TaskTransition::Unsuspend).then_some(now)
    }

    /// Cancel is terminal and stamps `executed`.
    fn executed_time(transition: &TaskTransition, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        matches!(transition, TaskTransition::Cancel).then_some(now)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn register_task_type(&self, definition: &TaskTypeDefinition) -> Result<()> {
        definition.validate()?;
        sqlx::query(
            r#"
            INSERT INTO task_types (code, enabled, max_concurrency, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                max_concurrency = EXCLUDED.max_concurrency,
                description = EXCLUDED.description
            "#,
        )
        .bind(&definition.code)
        .bind(definition.enabled)
        .bind(definition.max_concurrency)
        .bind(&definition.description)
        .execute(&self.pool)
        .await
        .map_err(store_error("register_task_type"))?;
        Ok(())
    }

    async fn set_task_type_enabled(&self, code: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE task_types SET enabled = $2 WHERE code = $1")
            .bind(code)
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(store_error("set_task_type_enabled"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn task_types(&self) -> Result<Vec<TaskTypeDefinition>> {
        sqlx::query_as::<_, TaskTypeDefinition>(
            "SELECT code, enabled, max_concurrency, description FROM task_types ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("task_types"))
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_error("create_task"))?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, status, priority, step, data, batch_id,
                               external_reference, queued, executed, next_execution,
                               execution_attempts, execution_time_ms, locked, lock_name, failure)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(task.status.code())
        .bind(task.priority.code())
        .bind(&task.step)
        .bind(&task.data)
        .bind(&task.batch_id)
        .bind(&task.external_reference)
        .bind(task.queued)
        .bind(task.executed)
        .bind(task.next_execution)
        .bind(task.execution_attempts)
        .bind(task.execution_time_ms)
        .bind(task.locked)
        .bind(&task.lock_name)
        .bind(&task.failure)
        .execute(&mut *tx)
        .await
        .map_err(store_error("create_task"))?;

        sqlx::query(
            "INSERT INTO task_events (task_id, event_type, timestamp, payload) \
             VALUES ($1, 'SUBMITTED', $2, NULL)",
        )
        .bind(task.id)
        .bind(task.queued)
        .execute(&mut *tx)
        .await
        .map_err(store_error("create_task"))?;

        tx.commit().await.map_err(store_error("create_task"))?;
        debug!("Task persisted");
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("find_task"))?
            .map(Task::try_from)
            .transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage> {
        const PREDICATE: &str = "(cardinality($1::text[]) = 0 OR status = ANY($1)) \
             AND ($2::text IS NULL OR task_type = $2) \
             AND ($3::text IS NULL OR batch_id = $3)";

        let statuses = codes(&filter.statuses);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM tasks WHERE {PREDICATE}"))
            .bind(&statuses)
            .bind(&filter.task_type)
            .bind(&filter.batch_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error("list_tasks"))?;

        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {PREDICATE} \
             ORDER BY queued, id OFFSET $4 LIMIT $5"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(&statuses)
            .bind(&filter.task_type)
            .bind(&filter.batch_id)
            .bind(page.offset as i64)
            .bind(i64::from(page.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("list_tasks"))?;

        Ok(TaskPage {
            tasks: rows
                .into_iter()
                .map(Task::try_from)
                .collect::<Result<Vec<_>>>()?,
            total: total as u64,
            page,
        })
    }

    #[instrument(skip(self, task_types))]
    async fn claim_tasks(
        &self,
        worker_id: &str,
        task_types: &[String],
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        if task_types.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(store_error("claim_tasks"))?;

        let candidates: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT t.id
            FROM tasks t
            JOIN task_types tt ON tt.code = t.task_type
            WHERE t.status = 'QUEUED'
              AND tt.enabled
              AND t.task_type = ANY($1)
              AND (t.next_execution IS NULL OR t.next_execution <= $2)
              AND (tt.max_concurrency IS NULL OR tt.max_concurrency > (
                    SELECT COUNT(*) FROM tasks e
                    WHERE e.task_type = t.task_type AND e.status = 'EXECUTING'))
            ORDER BY t.priority, t.queued
            LIMIT $3
            FOR UPDATE OF t SKIP LOCKED
            "#,
        )
        .bind(task_types)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error("claim_tasks"))?;

        if candidates.is_empty() {
            tx.rollback().await.map_err(store_error("claim_tasks"))?;
            debug!("No eligible tasks to claim");
            return Ok(Vec::new());
        }

        let query = format!(
            "UPDATE tasks \
             SET status = 'EXECUTING', locked = $2, lock_name = $3, \
                 execution_attempts = execution_attempts + 1 \
             WHERE id = ANY($1) AND status = 'QUEUED' \
             RETURNING {TASK_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(&candidates)
            .bind(now)
            .bind(worker_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(store_error("claim_tasks"))?;

        sqlx::query(
            r#"
            INSERT INTO task_events (task_id, event_type, timestamp, payload)
            SELECT id, 'CLAIMED', $2,
                   jsonb_build_object('worker_id', $3::text, 'attempt', execution_attempts)
            FROM tasks
            WHERE id = ANY($1)
            "#,
        )
        .bind(&candidates)
        .bind(now)
        .bind(worker_id)
        .execute(&mut *tx)
        .await
        .map_err(store_error("claim_tasks"))?;

        tx.commit().await.map_err(store_error("claim_tasks"))?;

        let mut claimed = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(|task| (task.priority, task.queued));

        if !claimed.is_empty() {
            info!(claimed_count = claimed.len(), "Claimed tasks for execution");
        }
        Ok(claimed)
    }

    async fn complete_task(
        &self,
        id: Uuid,
        worker_id: &str,
        data: Option<Value>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r#"
            WITH updated AS (
                UPDATE tasks
                SET status = 'COMPLETED', executed = $3, data = COALESCE($4::jsonb, data),
                    next_execution = NULL, locked = NULL, lock_name = NULL,
                    execution_time_ms = execution_time_ms + $5
                WHERE id = $1 AND status = 'EXECUTING' AND lock_name = $2
                RETURNING id
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, 'COMPLETED', $3, NULL FROM updated
            )
            SELECT id FROM updated
        "#;

        let updated: Option<Uuid> = sqlx::query_scalar(query)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .bind(data)
            .bind(elapsed_ms.max(0))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("complete_task"))?;
        Ok(updated.is_some())
    }

    async fn fail_task(
        &self,
        id: Uuid,
        worker_id: &str,
        failure: &str,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r#"
            WITH updated AS (
                UPDATE tasks
                SET status = 'FAILED', executed = $3, failure = $4,
                    locked = NULL, lock_name = NULL,
                    execution_time_ms = execution_time_ms + $5
                WHERE id = $1 AND status = 'EXECUTING' AND lock_name = $2
                RETURNING id
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, 'FAILED', $3, jsonb_build_object('failure', $4::text) FROM updated
            )
            SELECT id FROM updated
        "#;

        let updated: Option<Uuid> = sqlx::query_scalar(query)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .bind(failure)
            .bind(elapsed_ms.max(0))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("fail_task"))?;
        Ok(updated.is_some())
    }

    async fn delay_task(
        &self,
        id: Uuid,
        worker_id: &str,
        next_execution: DateTime<Utc>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r#"
            WITH updated AS (
                UPDATE tasks
                SET status = 'QUEUED', next_execution = $4,
                    locked = NULL, lock_name = NULL,
                    execution_time_ms = execution_time_ms + $5
                WHERE id = $1 AND status = 'EXECUTING' AND lock_name = $2
                RETURNING id
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, 'DELAYED', $3, jsonb_build_object('next_execution', $4::timestamptz)
                FROM updated
            )
            SELECT id FROM updated
        "#;

        let updated: Option<Uuid> = sqlx::query_scalar(query)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .bind(next_execution)
            .bind(elapsed_ms.max(0))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("delay_task"))?;
        Ok(updated.is_some())
    }

    async fn advance_task_step(
        &self,
        id: Uuid,
        worker_id: &str,
        step: &str,
        data: Option<Value>,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r#"
            WITH updated AS (
                UPDATE tasks
                SET status = 'QUEUED', step = $4, data = COALESCE($5::jsonb, data),
                    execution_attempts = 0, next_execution = $3,
                    locked = NULL, lock_name = NULL,
                    execution_time_ms = execution_time_ms + $6
                WHERE id = $1 AND status = 'EXECUTING' AND lock_name = $2
                  AND step IS NOT NULL
                RETURNING id
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, 'STEP_ADVANCED', $3, jsonb_build_object('step', $4::text) FROM updated
            )
            SELECT id FROM updated
        "#;

        let updated: Option<Uuid> = sqlx::query_scalar(query)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .bind(step)
            .bind(data)
            .bind(elapsed_ms.max(0))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("advance_task_step"))?;
        Ok(updated.is_some())
    }

    async fn cancel_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.status_transition(id, TaskTransition::Cancel, now).await
    }

    async fn suspend_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.status_transition(id, TaskTransition::Suspend, now).await
    }

    async fn unsuspend_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.status_transition(id, TaskTransition::Unsuspend, now).await
    }

    async fn cancel_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.batch_transition(batch_id, TaskTransition::Cancel, now).await
    }

    async fn suspend_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.batch_transition(batch_id, TaskTransition::Suspend, now).await
    }

    async fn unsuspend_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.batch_transition(batch_id, TaskTransition::Unsuspend, now).await
    }

    #[instrument(skip(self))]
    async fn requeue_hung_tasks(
        &self,
        locked_before: DateTime<Utc>,
        task_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let query = r#"
            WITH hung AS (
                SELECT id, lock_name FROM tasks
                WHERE status = 'EXECUTING' AND locked < $1
                  AND ($2::text IS NULL OR task_type = $2)
                FOR UPDATE SKIP LOCKED
            ), updated AS (
                UPDATE tasks t
                SET status = 'QUEUED', locked = NULL, lock_name = NULL
                FROM hung
                WHERE t.id = hung.id
                RETURNING t.id, hung.lock_name AS previous_lock
            ), recorded AS (
                INSERT INTO task_events (task_id, event_type, timestamp, payload)
                SELECT id, 'RECOVERED', $3, jsonb_build_object('lock_name', previous_lock)
                FROM updated
            )
            SELECT id FROM updated
        "#;

        sqlx::query_scalar(query)
            .bind(locked_before)
            .bind(task_type)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("requeue_hung_tasks"))
    }

    #[instrument(skip(self))]
    async fn archive_tasks(
        &self,
        executed_before: DateTime<Utc>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(store_error("archive_tasks"))?;

        let expired: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM tasks
            WHERE status = ANY($1) AND executed <= $2
            ORDER BY executed
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(codes(&status_groups::TERMINAL))
        .bind(executed_before)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error("archive_tasks"))?;

        if expired.is_empty() {
            tx.rollback().await.map_err(store_error("archive_tasks"))?;
            return Ok(0);
        }

        let copy = format!(
            "INSERT INTO archived_tasks ({TASK_COLUMNS}, archived) \
             SELECT {TASK_COLUMNS}, $2 FROM tasks WHERE id = ANY($1) \
             ON CONFLICT (id) DO NOTHING"
        );
        let copied = sqlx::query(&copy)
            .bind(&expired)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_error("archive_tasks"))?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM tasks t
            WHERE t.id = ANY($1)
              AND EXISTS (SELECT 1 FROM archived_tasks a WHERE a.id = t.id)
            "#,
        )
        .bind(&expired)
        .execute(&mut *tx)
        .await
        .map_err(store_error("archive_tasks"))?;

        tx.commit().await.map_err(store_error("archive_tasks"))?;

        debug!(
            selected = expired.len(),
            copied = copied.rows_affected(),
            deleted = deleted.rows_affected(),
            "Archive batch committed"
        );
        Ok(deleted.rows_affected())
    }

    async fn find_archived_task(&self, id: Uuid) -> Result<Option<ArchivedTask>> {
        let query = format!("SELECT {TASK_COLUMNS}, archived FROM archived_tasks WHERE id = $1");
        sqlx::query_as::<_, ArchivedTaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("find_archived_task"))?
            .map(ArchivedTask::try_from)
            .transpose()
    }

    async fn task_events(&self, id: Uuid) -> Result<Vec<TaskEvent>> {
        sqlx::query_as::<_, TaskEventRow>(
            "SELECT task_id, event_type, timestamp, payload FROM task_events \
             WHERE task_id = $1 ORDER BY timestamp, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("task_events"))?
        .into_iter()
        .map(TaskEvent::try_from)
        .collect()
    }
}
