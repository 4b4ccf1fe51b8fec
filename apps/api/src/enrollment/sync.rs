//! Enrollment synchronizer keeps the enrollment row consistent with the
//! generation lifecycle and with recorded progress.
//!
//! Every write is a read-modify-write under the store's row lock. The
//! transition functions are pure so the rules can be tested without a store:
//!
//! - only `begin` moves a pair into `in_progress`, and it claims the pair for
//!   its job via `latest_job_id`;
//! - `complete` and `fail` apply only while the pair is `in_progress` for that
//!   same job, so a stale job never overwrites a newer one. `fail` may also
//!   follow that same job's own `complete`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::GeneratedContent;
use crate::models::enrollment::{
    progress_for, ContentGenerationStatus, DerivedStatus, Enrollment, EnrollmentStatus,
};
use crate::store::{bounded, EnrollmentUpdate, PipelineStore, ProgressUpdate, UnitCompletion};

// ────────────────────────────────────────────────────────────────────────────
// Pure transitions
// ────────────────────────────────────────────────────────────────────────────

pub fn mark_generation_started(
    current: Option<Enrollment>,
    learner_id: &str,
    course_id: &str,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Enrollment {
    let mut enrollment = current.unwrap_or_else(|| Enrollment::new(learner_id, course_id, now));
    enrollment.content_generation_status = ContentGenerationStatus::InProgress;
    enrollment.latest_job_id = Some(job_id);
    enrollment.updated_at = now;
    enrollment
}

/// Points the enrollment at `content`, resets unit counters to the new
/// section set and refreshes the assessed progress. `None` means the
/// transition does not apply.
pub fn mark_generation_completed(
    current: Option<Enrollment>,
    job_id: Uuid,
    content_id: Uuid,
    total_units: i32,
    completed_units: i32,
    now: DateTime<Utc>,
) -> Option<Enrollment> {
    let mut enrollment = current?;
    if !owns_generation(&enrollment, job_id) {
        return None;
    }

    let progress = progress_for(completed_units, total_units);
    enrollment.content_generation_status = ContentGenerationStatus::Completed;
    enrollment.active_content_id = Some(content_id);
    enrollment.total_units = total_units;
    enrollment.completed_units = completed_units.clamp(0, total_units);
    enrollment.progress_percent = progress;
    enrollment.status = EnrollmentStatus::for_progress(progress);
    enrollment.assessed_progress = progress;
    enrollment.updated_at = now;
    Some(enrollment)
}

/// Also applies when `job_id` already completed the enrollment, so a job
/// that fails after its content went live never leaves the two disagreeing.
pub fn mark_generation_failed(
    current: Option<Enrollment>,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Option<Enrollment> {
    let mut enrollment = current?;
    let own_completion = enrollment.content_generation_status
        == ContentGenerationStatus::Completed
        && enrollment.latest_job_id == Some(job_id);
    if !owns_generation(&enrollment, job_id) && !own_completion {
        return None;
    }
    enrollment.content_generation_status = ContentGenerationStatus::Failed;
    enrollment.updated_at = now;
    Some(enrollment)
}

pub fn apply_unit_progress(
    mut enrollment: Enrollment,
    completed_units: i32,
    total_units: i32,
    now: DateTime<Utc>,
) -> Enrollment {
    let progress = progress_for(completed_units, total_units);
    enrollment.total_units = total_units;
    enrollment.completed_units = completed_units.clamp(0, total_units.max(0));
    enrollment.progress_percent = progress;
    enrollment.status = EnrollmentStatus::for_progress(progress);
    enrollment.updated_at = now;
    enrollment
}

fn owns_generation(enrollment: &Enrollment, job_id: Uuid) -> bool {
    enrollment.content_generation_status == ContentGenerationStatus::InProgress
        && enrollment.latest_job_id == Some(job_id)
}

/// Recorded completions that still name a unit of the content.
pub fn count_units(recorded: &[String], modules: &HashSet<String>) -> i32 {
    recorded.iter().filter(|unit| modules.contains(*unit)).count() as i32
}

fn module_ids(content: &GeneratedContent) -> HashSet<String> {
    content.sections.iter().map(|s| s.module_id.clone()).collect()
}

/// Result of recording one unit completion.
#[derive(Debug)]
pub enum ProgressRecord {
    /// Written. `previous_progress` is the stored progress this update replaced.
    Applied {
        previous_progress: i32,
        enrollment: Enrollment,
    },
    /// The enrollment moved to other content after the unit was validated.
    /// Nothing was written.
    ContentChanged,
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EnrollmentSynchronizer {
    store: Arc<dyn PipelineStore>,
    store_timeout: Duration,
}

impl EnrollmentSynchronizer {
    pub fn new(store: Arc<dyn PipelineStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Upserts the enrollment and marks generation in progress for `job_id`.
    pub async fn begin_generation(
        &self,
        learner_id: &str,
        course_id: &str,
        job_id: Uuid,
    ) -> Result<Enrollment, AppError> {
        let (learner, course) = (learner_id.to_string(), course_id.to_string());
        let update: EnrollmentUpdate = Box::new(move |current| {
            Ok(Some(mark_generation_started(
                current,
                &learner,
                &course,
                job_id,
                Utc::now(),
            )))
        });

        let enrollment = bounded(
            self.store_timeout,
            "update_enrollment",
            self.store.update_enrollment(learner_id, course_id, update),
        )
        .await?
        .ok_or_else(|| AppError::Persistence("enrollment upsert returned no row".to_string()))?;

        debug!(
            "Enrollment {} / {} marked in_progress for job {}",
            learner_id, course_id, job_id
        );
        Ok(enrollment)
    }

    /// Links the enrollment to freshly activated content. Completed units are
    /// recounted under the row lock. Returns the stored row, which is unchanged
    /// when `job_id` is no longer the latest job.
    pub async fn complete_generation(
        &self,
        learner_id: &str,
        course_id: &str,
        job_id: Uuid,
        content: &GeneratedContent,
    ) -> Result<Option<Enrollment>, AppError> {
        let (content_id, total_units) = (content.id, content.unit_count());
        let modules = module_ids(content);

        let update: ProgressUpdate = Box::new(move |current, recorded: &[String]| {
            let next = mark_generation_completed(
                current,
                job_id,
                content_id,
                total_units,
                count_units(recorded, &modules),
                Utc::now(),
            );
            if next.is_none() {
                warn!("Job {job_id} is no longer the latest generation, leaving enrollment as is");
            }
            Ok(next)
        });

        let stored = bounded(
            self.store_timeout,
            "update_enrollment_progress",
            self.store
                .update_enrollment_progress(learner_id, course_id, None, update),
        )
        .await?;

        if let Some(e) = stored.as_ref().filter(|e| e.active_content_id == Some(content_id)) {
            info!(
                "Enrollment {} / {} now on content {} ({}/{} units)",
                learner_id, course_id, content_id, e.completed_units, e.total_units
            );
        }
        Ok(stored)
    }

    pub async fn fail_generation(
        &self,
        learner_id: &str,
        course_id: &str,
        job_id: Uuid,
    ) -> Result<Option<Enrollment>, AppError> {
        let update: EnrollmentUpdate = Box::new(move |current| {
            Ok(mark_generation_failed(current, job_id, Utc::now()))
        });
        bounded(
            self.store_timeout,
            "update_enrollment",
            self.store.update_enrollment(learner_id, course_id, update),
        )
        .await
    }

    /// Records one unit completion against `content` and rewrites the unit
    /// counters, in one atomic unit under the row lock. Applies only while the
    /// enrollment still points at `content`.
    pub async fn record_unit_completion(
        &self,
        learner_id: &str,
        course_id: &str,
        content: &GeneratedContent,
        change: UnitCompletion,
    ) -> Result<ProgressRecord, AppError> {
        let (learner, course) = (learner_id.to_string(), course_id.to_string());
        let (content_id, total_units) = (content.id, content.unit_count());
        let modules = module_ids(content);
        let (previous_tx, mut previous_rx) = oneshot::channel();

        let update: ProgressUpdate = Box::new(move |current, recorded: &[String]| {
            let enrollment = current.ok_or_else(|| not_enrolled(&learner, &course))?;
            if enrollment.active_content_id != Some(content_id) {
                return Ok(None);
            }
            let _ = previous_tx.send(enrollment.progress_percent);
            let completed_units = count_units(recorded, &modules);
            Ok(Some(apply_unit_progress(
                enrollment,
                completed_units,
                total_units,
                Utc::now(),
            )))
        });

        let stored = bounded(
            self.store_timeout,
            "update_enrollment_progress",
            self.store
                .update_enrollment_progress(learner_id, course_id, Some(change), update),
        )
        .await?
        .ok_or_else(|| not_enrolled(learner_id, course_id))?;

        Ok(match previous_rx.try_recv() {
            Ok(previous_progress) => ProgressRecord::Applied {
                previous_progress,
                enrollment: stored,
            },
            Err(_) => ProgressRecord::ContentChanged,
        })
    }

    /// Stores a reassessment result and the progress it was computed at.
    pub async fn record_assessment(
        &self,
        learner_id: &str,
        course_id: &str,
        derived_status: DerivedStatus,
        assessed_progress: i32,
    ) -> Result<Enrollment, AppError> {
        let (learner, course) = (learner_id.to_string(), course_id.to_string());
        let update: EnrollmentUpdate = Box::new(move |current| {
            let mut enrollment = current.ok_or_else(|| not_enrolled(&learner, &course))?;
            enrollment.derived_status = derived_status;
            enrollment.assessed_progress = assessed_progress;
            enrollment.updated_at = Utc::now();
            Ok(Some(enrollment))
        });

        bounded(
            self.store_timeout,
            "update_enrollment",
            self.store.update_enrollment(learner_id, course_id, update),
        )
        .await?
        .ok_or_else(|| not_enrolled(learner_id, course_id))
    }
}

fn not_enrolled(learner_id: &str, course_id: &str) -> AppError {
    AppError::NotFound(format!(
        "No enrollment for learner {learner_id} in course {course_id}"
    ))
}
