//! Axum route handlers for the Generation API.

use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::generation::coordinator::{RegenerationOutcome, RegenerationRequest};
use crate::state::AppState;

/// POST /api/v1/content/regenerate
///
/// Runs a regeneration to completion and returns the job handle. Failures
/// after the job was created carry its `job_id` in the error body.
pub async fn handle_regenerate(
    State(state): State<AppState>,
    Json(request): Json<RegenerationRequest>,
) -> Result<Json<RegenerationOutcome>, AppError> {
    let outcome = state.coordinator.start_regeneration(request).await?;
    Ok(Json(outcome))
}
