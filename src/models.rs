use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The closed set of upstream mutations a Task can carry. Internally tagged
/// so the wire shape matches `{"type": "create_node", ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CreateNode,
    UpdateCard,
    CreateShape,
    UpdateShape,
    DeleteShape,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CreateNode => "create_node",
            TaskKind::UpdateCard => "update_card",
            TaskKind::CreateShape => "create_shape",
            TaskKind::UpdateShape => "update_shape",
            TaskKind::DeleteShape => "delete_shape",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_node" => Ok(TaskKind::CreateNode),
            "update_card" => Ok(TaskKind::UpdateCard),
            "create_shape" => Ok(TaskKind::CreateShape),
            "update_shape" => Ok(TaskKind::UpdateShape),
            "delete_shape" => Ok(TaskKind::DeleteShape),
            other => anyhow::bail!("unknown task kind: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A single operation waiting to be applied against the upstream board API.
/// Only ever constructed from a database row (see `FromRow` below) — the
/// queue is the sole source of truth for a task's fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub user_id: String,
    pub job_id: Option<Uuid>,
    pub task_index: i32,
    pub status: TaskStatus,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        let kind_raw: String = row.try_get("kind")?;
        let status_raw: String = row.try_get("status")?;
        Ok(Task {
            id: row.try_get("id")?,
            kind: kind_raw.parse().map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?,
            payload: row.try_get("payload")?,
            user_id: row.try_get("user_id")?,
            job_id: row.try_get("job_id")?,
            task_index: row.try_get("task_index")?,
            status: match status_raw.as_str() {
                "queued" => TaskStatus::Queued,
                "processing" => TaskStatus::Processing,
                "completed" => TaskStatus::Completed,
                "failed" => TaskStatus::Failed,
                other => {
                    return Err(sqlx::Error::Decode(format!("unknown task status: {other}").into()))
                }
            },
            attempts: row.try_get("attempts")?,
            claimed_at: row.try_get("claimed_at")?,
            worker_id: row.try_get("worker_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A task that exhausted retries or hit a non-retryable error. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeadLetterTask {
    pub id: i64,
    pub task_id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub user_id: String,
    pub job_id: Option<Uuid>,
    pub task_index: i32,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub index: i32,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The aggregate view of one submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub total: i32,
    pub operations: Vec<OperationResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for Job {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        let status_raw: String = row.try_get("status")?;
        let operations_raw: serde_json::Value = row.try_get("operations")?;
        let operations = serde_json::from_value(operations_raw)
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(Job {
            id: row.try_get("id")?,
            status: JobStatus::from_str(&status_raw),
            total: row.try_get("total")?,
            operations,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// An upstream-linked user and their sealed OAuth tokens.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub name: Option<String>,
    pub access_token: Vec<u8>,
    pub refresh_token: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntryIn {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
}
