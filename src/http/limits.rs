use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::Kernel;

pub async fn get_limits(State(kernel): State<Arc<Kernel>>) -> AppResult<Json<serde_json::Value>> {
    let queue_length = kernel.queue.queue_length().await.map_err(AppError::Internal)?;
    let bucket_fill = kernel.buckets.fill_snapshot().await;

    Ok(Json(json!({
        "queue_length": queue_length,
        "bucket_fill": bucket_fill,
    })))
}
