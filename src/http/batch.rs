use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::TaskKind;
use crate::Kernel;

const MAX_BATCH: usize = 500;
const REPLAY_WAIT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<Operation>,
}

/// The idempotency dedup decision must be atomic: if two requests with the
/// same key race here, only one may create a Job and enqueue Tasks. `reserve`
/// is the single atomic gate (`INSERT ... ON CONFLICT DO NOTHING`) — the
/// loser waits for the winner's response instead of redoing the work.
pub async fn submit_batch(
    State(kernel): State<Arc<Kernel>>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> AppResult<(axum::http::StatusCode, Json<serde_json::Value>)> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("X-User-Id header is required".into()))?
        .to_string();

    let idempotency_key = headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);

    let mut reserved = false;
    if let Some(key) = &idempotency_key {
        if let Some(cached) = kernel.idempotency.get(key).await.map_err(AppError::Internal)? {
            return Ok(replay(cached));
        }

        if kernel.idempotency.reserve(key).await.map_err(AppError::Internal)? {
            reserved = true;
        } else {
            let cached = kernel
                .idempotency
                .wait_for_result(key, REPLAY_WAIT)
                .await
                .map_err(AppError::Internal)?
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("timed out waiting for concurrent idempotent request"))
                })?;
            return Ok(replay(cached));
        }
    }

    let outcome = accept_batch(&kernel, &user_id, request).await;

    if let Some(key) = &idempotency_key {
        match &outcome {
            Ok(body) => kernel.idempotency.finalize(key, 202, body).await.map_err(AppError::Internal)?,
            Err(_) if reserved => kernel.idempotency.release(key).await.map_err(AppError::Internal)?,
            Err(_) => {}
        }
    }

    Ok((axum::http::StatusCode::ACCEPTED, Json(outcome?)))
}

fn replay(cached: crate::idempotency::CachedResponse) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    let status = axum::http::StatusCode::from_u16(cached.status).unwrap_or(axum::http::StatusCode::OK);
    (status, Json(cached.body))
}

async fn accept_batch(kernel: &Kernel, user_id: &str, request: BatchRequest) -> AppResult<serde_json::Value> {
    if request.operations.is_empty() {
        return Err(AppError::UnprocessableEntity("operations must not be empty".into()));
    }
    if request.operations.len() > MAX_BATCH {
        return Err(AppError::PayloadTooLarge(format!("batch exceeds maximum of {MAX_BATCH} operations")));
    }

    let job_id = kernel.jobs.create(request.operations.len() as i32).await.map_err(AppError::Internal)?;

    for (index, op) in request.operations.iter().enumerate() {
        kernel
            .queue
            .enqueue(op.kind, op.data.clone(), user_id, Some(job_id), index as i32)
            .await
            .map_err(AppError::Internal)?;
    }

    Ok(json!({ "job_id": job_id, "enqueued": request.operations.len() }))
}
