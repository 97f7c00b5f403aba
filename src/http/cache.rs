use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::Kernel;

pub async fn get_cache(
    State(kernel): State<Arc<Kernel>>,
    Path(board_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let snapshot = kernel
        .cache
        .get(&board_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("no cached snapshot for board {board_id}")))?;

    Ok(Json(snapshot))
}
