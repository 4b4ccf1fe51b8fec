use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::errors::AppError;
use crate::state::AppState;
use crate::tasks::dispatcher::TaskOutcome;

/// POST /api/v1/tasks/:kind
///
/// Runs a registered task synchronously and returns its typed result.
pub async fn handle_run_task(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<TaskOutcome>, AppError> {
    let outcome = state.dispatcher.dispatch_named(&kind, payload).await?;
    Ok(Json(outcome))
}
