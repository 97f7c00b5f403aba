use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Job, JobStatus, OperationResult, OperationStatus};

/// CRUD and atomic aggregation for batch [`Job`]s.
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, total: i32) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, total, operations, created_at, updated_at)
            VALUES ($1, 'queued', $2, '[]', now(), now())
            "#,
        )
        .bind(id)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Appends one terminal task outcome and transitions status accordingly.
    /// `failed` is sticky: once set it is never downgraded by a later
    /// success. Runs as a single read-modify-write transaction.
    pub async fn record_outcome(
        &self,
        job_id: Uuid,
        index: i32,
        status: OperationStatus,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: (String, i32, serde_json::Value) = sqlx::query_as(
            "SELECT status, total, operations FROM jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        let (current_status, total, operations_raw) = row;
        let mut operations: Vec<OperationResult> = serde_json::from_value(operations_raw)?;
        operations.push(OperationResult { index, status, error });

        let already_failed = current_status == "failed";
        let any_failed = already_failed || operations.iter().any(|o| o.status == OperationStatus::Failed);
        let new_status = if any_failed {
            JobStatus::Failed
        } else if operations.len() as i32 >= total {
            JobStatus::Succeeded
        } else {
            JobStatus::Running
        };

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, operations = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(new_status.as_str())
        .bind(serde_json::to_value(&operations)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
