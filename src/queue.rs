use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::{DeadLetterTask, Task, TaskKind};

/// What happened to a claimed task, reported back to the queue by the worker.
pub enum TaskOutcome {
    Completed,
    Retry,
    Failed { error: String },
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        user_id: &str,
        job_id: Option<Uuid>,
        task_index: i32,
    ) -> anyhow::Result<i64>;

    async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Task>>;

    async fn ack(&self, task: &Task, outcome: TaskOutcome) -> anyhow::Result<()>;

    async fn recover_orphans(&self, lease: Duration) -> anyhow::Result<u64>;

    async fn queue_length(&self) -> anyhow::Result<i64>;

    /// Wakes any worker parked waiting for new work.
    fn notify(&self);

    /// Handle to the wakeup signal, for a worker to park on directly instead
    /// of only polling `claim_next` on a timer.
    fn wakeup_handle(&self) -> Arc<Notify>;
}

/// PostgreSQL-backed queue. Claims use `FOR UPDATE SKIP LOCKED` so two
/// workers never receive the same row; ack applies the Task state machine
/// described in SPEC_FULL.md §4.1 as a single transaction per outcome.
pub struct PostgresTaskQueue {
    pool: PgPool,
    wakeup: Arc<Notify>,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, wakeup: Arc::new(Notify::new()) }
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn enqueue(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        user_id: &str,
        job_id: Option<Uuid>,
        task_index: i32,
    ) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO queue_tasks (kind, payload, user_id, job_id, task_index, status, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, 'queued', 0, now())
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(&payload)
        .bind(user_id)
        .bind(job_id)
        .bind(task_index)
        .fetch_one(&self.pool)
        .await?;

        self.wakeup.notify_one();
        Ok(row.0)
    }

    async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(
            r#"
            WITH next AS (
                SELECT id FROM queue_tasks
                WHERE status = 'queued'
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE queue_tasks
            SET status = 'processing', claimed_at = now(), worker_id = $1
            WHERE id IN (SELECT id FROM next)
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn ack(&self, task: &Task, outcome: TaskOutcome) -> anyhow::Result<()> {
        match outcome {
            TaskOutcome::Completed => {
                sqlx::query("DELETE FROM queue_tasks WHERE id = $1")
                    .bind(task.id)
                    .execute(&self.pool)
                    .await?;
            }
            TaskOutcome::Retry => {
                sqlx::query(
                    r#"
                    UPDATE queue_tasks
                    SET status = 'queued', claimed_at = NULL, attempts = attempts + 1
                    WHERE id = $1
                    "#,
                )
                .bind(task.id)
                .execute(&self.pool)
                .await?;
                self.wakeup.notify_one();
            }
            TaskOutcome::Failed { error } => {
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO dead_letter_tasks (task_id, kind, payload, user_id, job_id, task_index, error, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, now())
                    "#,
                )
                .bind(task.id)
                .bind(task.kind.as_str())
                .bind(&task.payload)
                .bind(&task.user_id)
                .bind(task.job_id)
                .bind(task.task_index)
                .bind(&error)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM queue_tasks WHERE id = $1")
                    .bind(task.id)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn recover_orphans(&self, lease: Duration) -> anyhow::Result<u64> {
        let threshold = Utc::now() - chrono::Duration::from_std(lease)?;
        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = 'queued', claimed_at = NULL
            WHERE status = 'processing' AND claimed_at < $1
            "#,
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            self.wakeup.notify_one();
        }
        Ok(recovered)
    }

    async fn queue_length(&self) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM queue_tasks WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    fn notify(&self) {
        self.wakeup.notify_one();
    }

    fn wakeup_handle(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }
}

impl PostgresTaskQueue {
    pub async fn dead_letters_for_job(&self, job_id: Uuid) -> anyhow::Result<Vec<DeadLetterTask>> {
        let rows = sqlx::query_as::<_, DeadLetterTask>(
            "SELECT * FROM dead_letter_tasks WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
