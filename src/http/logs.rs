use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;

use crate::error::{AppError, AppResult};
use crate::models::LogEntryIn;
use crate::Kernel;

/// Reads the raw body first so the size limit is enforced before any JSON
/// parsing, matching the original `/api/logs` boundary behavior.
pub async fn submit_logs(State(kernel): State<Arc<Kernel>>, body: Bytes) -> AppResult<StatusCode> {
    if body.len() > kernel.config.log_max_payload_bytes {
        return Err(AppError::PayloadTooLarge("log payload exceeds maximum size".into()));
    }

    let entries: Vec<LogEntryIn> =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("invalid log payload: {e}")))?;

    if entries.len() > kernel.config.log_max_entries {
        return Err(AppError::PayloadTooLarge("too many log entries".into()));
    }

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO log_entries ("timestamp", level, message, context, created_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(entry.timestamp)
        .bind(&entry.level)
        .bind(&entry.message)
        .bind(&entry.context)
        .execute(&kernel.pool)
        .await
        .map_err(AppError::Database)?;
    }

    Ok(StatusCode::ACCEPTED)
}
