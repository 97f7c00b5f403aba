use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::Kernel;

pub async fn get_job(
    State(kernel): State<Arc<Kernel>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let job = kernel
        .jobs
        .get(id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("no job with id {id}")))?;

    Ok(Json(json!({
        "id": job.id,
        "status": job.status.as_str(),
        "results": {
            "total": job.total,
            "operations": job.operations,
        },
        "updated_at": job.updated_at,
    })))
}
