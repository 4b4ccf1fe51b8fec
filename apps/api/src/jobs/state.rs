//! Generation job state machine.
//!
//! `in_progress → completed` or `in_progress → failed`; both terminal. A failed
//! job is never resumed: a new regeneration request always starts a new job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{GenerationJob, JobStatus};

/// Progress recorded when a job is created.
pub const INITIAL_PROGRESS: i32 = 10;

/// Result of a `fail` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Recorded,
    /// The job had already failed with the same message; nothing changed.
    AlreadyFailed,
}

impl GenerationJob {
    /// A new job, already in progress at step 1.
    pub fn start(
        learner_id: &str,
        course_id: &str,
        total_steps: i32,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if learner_id.trim().is_empty() {
            return Err(AppError::Validation("learner_id cannot be empty".to_string()));
        }
        if course_id.trim().is_empty() {
            return Err(AppError::Validation("course_id cannot be empty".to_string()));
        }
        if total_steps < 1 {
            return Err(AppError::Validation(format!(
                "total_steps must be at least 1 (got {total_steps})"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            status: JobStatus::InProgress,
            current_step: 1,
            total_steps,
            progress_percent: INITIAL_PROGRESS,
            step_description: "Job created".to_string(),
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    fn ensure_in_progress(&self, action: &str) -> Result<(), AppError> {
        if self.status.is_terminal() {
            return Err(AppError::InvalidJobState(format!(
                "cannot {action} job {}: already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Moves the job to `step`. Progress never goes backwards: a lower value
    /// is clamped to the stored one with a warning.
    pub fn advance(
        &mut self,
        step: i32,
        progress_percent: i32,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.ensure_in_progress("advance")?;
        if step < 1 || step > self.total_steps {
            return Err(AppError::Validation(format!(
                "step {step} is outside 1..={} for job {}",
                self.total_steps, self.id
            )));
        }

        let requested = progress_percent.clamp(0, 100);
        if requested < self.progress_percent {
            warn!(
                "Job {}: progress {} is below stored {}, clamping",
                self.id, requested, self.progress_percent
            );
        }

        self.current_step = step;
        self.progress_percent = requested.max(self.progress_percent);
        self.step_description = description.to_string();
        self.updated_at = now;
        Ok(())
    }

    /// Shallow-merges `patch` into the job metadata. Only while in progress.
    pub fn merge_metadata(&mut self, patch: Value, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_in_progress("annotate")?;
        match (&mut self.metadata, patch) {
            (Value::Object(existing), Value::Object(patch)) => existing.extend(patch),
            (slot, patch) => *slot = patch,
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_in_progress("complete")?;
        self.status = JobStatus::Completed;
        self.current_step = self.total_steps;
        self.progress_percent = 100;
        self.step_description = "Completed".to_string();
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Marks the job failed. Repeating the same failure is a no-op; failing a
    /// completed job (or re-failing with a different message) is rejected.
    pub fn fail(&mut self, message: &str, now: DateTime<Utc>) -> Result<FailOutcome, AppError> {
        if self.status == JobStatus::Failed && self.error_message.as_deref() == Some(message) {
            return Ok(FailOutcome::AlreadyFailed);
        }
        self.ensure_in_progress("fail")?;
        self.status = JobStatus::Failed;
        self.error_message = Some(message.to_string());
        self.step_description = format!("Failed at step {}", self.current_step);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(FailOutcome::Recorded)
    }
}
