use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{GenerationJob, JobStatus};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_step: i32,
    pub total_steps: i32,
    pub progress_percent: i32,
    pub step_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<GenerationJob> for JobStatusResponse {
    fn from(job: GenerationJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            current_step: job.current_step,
            total_steps: job.total_steps,
            progress_percent: job.progress_percent,
            step_description: job.step_description,
            error_message: job.error_message,
        }
    }
}

/// GET /api/v1/jobs/:job_id
///
/// Read-only poll of a generation job.
pub async fn handle_get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state.ledger.get(job_id).await?;
    Ok(Json(job.into()))
}
