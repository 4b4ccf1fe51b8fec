//! Pipeline store: the persistence seam for the generation pipeline.
//!
//! `PostgresStore` is the production backend. Tests run the same protocol
//! against `memory::MemoryStore`.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::GeneratedContent;
use crate::models::enrollment::Enrollment;
use crate::models::job::GenerationJob;
use crate::models::learner::{Course, Learner, PersonalizationInputs};

/// Read-modify-write step for an enrollment row. Receives the current row (if
/// any) and returns the row to write, or `None` to leave storage untouched.
pub type EnrollmentUpdate =
    Box<dyn FnOnce(Option<Enrollment>) -> Result<Option<Enrollment>, AppError> + Send>;

/// Read-modify-write step over an enrollment row and the pair's recorded unit
/// completions (with any pending change already applied). `None` leaves
/// storage untouched, including the pending change.
pub type ProgressUpdate = Box<
    dyn FnOnce(Option<Enrollment>, &[String]) -> Result<Option<Enrollment>, AppError> + Send,
>;

/// One unit marked (or un-marked) as completed.
#[derive(Debug, Clone)]
pub struct UnitCompletion {
    pub unit_id: String,
    pub completed: bool,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    // ── Profile store / course catalog (read-only collaborators) ──────────

    async fn get_learner(&self, learner_id: &str) -> Result<Option<Learner>, AppError>;

    async fn get_course(&self, course_id: &str) -> Result<Option<Course>, AppError>;

    async fn get_personalization_inputs(
        &self,
        learner_id: &str,
    ) -> Result<PersonalizationInputs, AppError>;

    // ── Job ledger ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &GenerationJob) -> Result<(), AppError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<GenerationJob>, AppError>;

    /// Overwrites the mutable fields of `job` only while the stored row is still
    /// `in_progress`. Returns `false` when the stored row is terminal (or gone).
    async fn update_in_progress_job(&self, job: &GenerationJob) -> Result<bool, AppError>;

    // ── Generated content ─────────────────────────────────────────────────

    async fn get_active_content(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<GeneratedContent>, AppError>;

    async fn get_content(&self, content_id: Uuid) -> Result<Option<GeneratedContent>, AppError>;

    /// Stage-then-swap, as one atomic unit: persist `content` and its sections,
    /// deactivate every other active row for the pair, remove the `retired`
    /// rows, and mark `content` active. Either all of it lands or none of it.
    async fn swap_active_content(
        &self,
        content: &GeneratedContent,
        retired: &[Uuid],
    ) -> Result<(), AppError>;

    // ── Enrollment ────────────────────────────────────────────────────────

    async fn get_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, AppError>;

    /// Applies `update` to the pair's enrollment under a row lock and writes
    /// the result. Returns the row as stored afterwards.
    async fn update_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
        update: EnrollmentUpdate,
    ) -> Result<Option<Enrollment>, AppError>;

    /// Applies an optional unit completion and then `update`, all under the
    /// enrollment row lock as one atomic unit. Completions are idempotent per
    /// (learner, course, unit). Returns the row as stored afterwards.
    async fn update_enrollment_progress(
        &self,
        learner_id: &str,
        course_id: &str,
        change: Option<UnitCompletion>,
        update: ProgressUpdate,
    ) -> Result<Option<Enrollment>, AppError>;
}

/// Bounds one store round trip. An elapsed timer surfaces as a persistence
/// error naming the operation.
pub async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Persistence(format!(
            "timeout after {}ms during {operation}",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: Result<(), AppError> = bounded(Duration::from_secs(1), "get_job", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(AppError::Persistence(msg)) => {
                assert!(msg.starts_with("timeout"));
                assert!(msg.contains("get_job"));
            }
            other => panic!("expected persistence timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let value = bounded(Duration::from_secs(1), "noop", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
