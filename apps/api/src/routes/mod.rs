pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::enrollment::handlers as enrollment;
use crate::generation::handlers as generation;
use crate::jobs::handlers as jobs;
use crate::state::AppState;
use crate::tasks::handlers as tasks;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Generation API
        .route(
            "/api/v1/content/regenerate",
            post(generation::handle_regenerate),
        )
        .route("/api/v1/jobs/:job_id", get(jobs::handle_get_job_status))
        // Enrollment API
        .route(
            "/api/v1/enrollments/progress",
            post(enrollment::handle_update_progress),
        )
        // Task API
        .route("/api/v1/tasks/:kind", post(tasks::handle_run_task))
        .with_state(state)
}
