use axum::{extract::State, Json};

use crate::enrollment::progress::{ProgressUpdateRequest, ProgressUpdateResponse};
use crate::errors::AppError;
use crate::state::AppState;

/// POST /api/v1/enrollments/progress
pub async fn handle_update_progress(
    State(state): State<AppState>,
    Json(request): Json<ProgressUpdateRequest>,
) -> Result<Json<ProgressUpdateResponse>, AppError> {
    let response = state.progress.update_progress(request).await?;
    Ok(Json(response))
}
