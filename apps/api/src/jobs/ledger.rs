//! Job Ledger service: applies state-machine transitions against the store.
//!
//! Every write is conditional on the stored row still being `in_progress`, so a
//! terminal job can never be rewritten even by a stale copy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::state::FailOutcome;
use crate::models::job::GenerationJob;
use crate::store::{bounded, PipelineStore};

#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn PipelineStore>,
    store_timeout: Duration,
}

impl JobLedger {
    pub fn new(store: Arc<dyn PipelineStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Inserts a new in-progress job at step 1 and returns its id.
    pub async fn create_job(
        &self,
        learner_id: &str,
        course_id: &str,
        total_steps: i32,
        metadata: Value,
    ) -> Result<Uuid, AppError> {
        let job = GenerationJob::start(learner_id, course_id, total_steps, metadata, Utc::now())?;
        bounded(self.store_timeout, "insert_job", self.store.insert_job(&job)).await?;
        info!(
            "Created generation job {} for learner {} / course {}",
            job.id, learner_id, course_id
        );
        Ok(job.id)
    }

    /// Read-only snapshot of a job.
    pub async fn get(&self, job_id: Uuid) -> Result<GenerationJob, AppError> {
        bounded(self.store_timeout, "get_job", self.store.get_job(job_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
    }

    pub async fn advance(
        &self,
        job_id: Uuid,
        step: i32,
        progress_percent: i32,
        description: &str,
    ) -> Result<GenerationJob, AppError> {
        let mut job = self.get(job_id).await?;
        job.advance(step, progress_percent, description, Utc::now())?;
        self.write(&job, "advance").await?;
        debug!(
            "Job {} advanced to step {}/{} ({}%): {}",
            job.id, job.current_step, job.total_steps, job.progress_percent, description
        );
        Ok(job)
    }

    /// Merges `patch` into the job's metadata while it is still running.
    pub async fn annotate(&self, job_id: Uuid, patch: Value) -> Result<GenerationJob, AppError> {
        let mut job = self.get(job_id).await?;
        job.merge_metadata(patch, Utc::now())?;
        self.write(&job, "annotate").await?;
        Ok(job)
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<GenerationJob, AppError> {
        let mut job = self.get(job_id).await?;
        job.complete(Utc::now())?;
        self.write(&job, "complete").await?;
        info!("Generation job {} completed", job.id);
        Ok(job)
    }

    pub async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<GenerationJob, AppError> {
        let mut job = self.get(job_id).await?;
        match job.fail(error_message, Utc::now())? {
            FailOutcome::AlreadyFailed => {
                debug!("Job {} already failed with the same message", job.id);
            }
            FailOutcome::Recorded => {
                self.write(&job, "fail").await?;
                warn!("Generation job {} failed: {}", job.id, error_message);
            }
        }
        Ok(job)
    }

    async fn write(&self, job: &GenerationJob, action: &str) -> Result<(), AppError> {
        let written = bounded(
            self.store_timeout,
            "update_job",
            self.store.update_in_progress_job(job),
        )
        .await?;
        if !written {
            return Err(AppError::InvalidJobState(format!(
                "cannot {action} job {}: it reached a terminal state concurrently",
                job.id
            )));
        }
        Ok(())
    }
}
