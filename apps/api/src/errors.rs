use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing personalization data: {0}")]
    MissingPersonalizationData(String),

    #[error("Regeneration already in progress for learner {learner_id} / course {course_id}")]
    RegenerationInProgress {
        learner_id: String,
        course_id: String,
    },

    #[error("Invalid job state: {0}")]
    InvalidJobState(String),

    #[error("Generation provider error: {0}")]
    GenerationProvider(String),

    #[error("Generation contract violation: {0}")]
    GenerationContractViolation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Any failure raised after a job exists. `job_id` is the correlation token
    /// handed back to the caller.
    #[error("{source} (job {job_id})")]
    Job {
        job_id: Uuid,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Attaches a job id to this error. Already-correlated errors are returned as is.
    pub fn for_job(self, job_id: Uuid) -> Self {
        match self {
            AppError::Job { .. } => self,
            other => AppError::Job {
                job_id,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any job correlation peeled off.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Job { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            AppError::Job { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::MissingPersonalizationData(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MISSING_PERSONALIZATION_DATA",
                msg.clone(),
            ),
            AppError::RegenerationInProgress { .. } => (
                StatusCode::CONFLICT,
                "REGENERATION_IN_PROGRESS",
                self.to_string(),
            ),
            AppError::InvalidJobState(msg) => {
                (StatusCode::CONFLICT, "INVALID_JOB_STATE", msg.clone())
            }
            AppError::GenerationProvider(msg) => {
                tracing::error!("Generation provider error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "GENERATION_PROVIDER_ERROR",
                    self.to_string(),
                )
            }
            AppError::GenerationContractViolation(msg) => {
                tracing::error!("Generation contract violation: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "GENERATION_CONTRACT_VIOLATION",
                    self.to_string(),
                )
            }
            AppError::Persistence(msg) => {
                tracing::error!("Persistence error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::UnknownTaskType(kind) => (
                StatusCode::BAD_REQUEST,
                "UNKNOWN_TASK_TYPE",
                format!("No handler registered for task type '{kind}'"),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::Job { source, .. } => source.parts(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = match self.job_id() {
            Some(job_id) => json!({
                "error": {
                    "code": code,
                    "message": message,
                    "job_id": job_id,
                    "job_status": "failed"
                }
            }),
            None => json!({
                "error": {
                    "code": code,
                    "message": message
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}
