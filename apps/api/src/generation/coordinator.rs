//! Regeneration coordinator: runs one personalized-content regeneration for a
//! (learner, course) pair from request to activated content.
//!
//! Flow (each numbered step is a job ledger step):
//!   1. claim the pair, resolve learner and course, create the job
//!   2. mark the enrollment in progress, gather personalization inputs
//!   3. reuse existing content, or stage the active row for replacement
//!   4. send the generation request (one retry on transient provider errors)
//!   5. receive and validate the response
//!   6. swap the new content in atomically, sync the enrollment, complete
//!
//! Any failure after the job exists marks the job failed with the error text,
//! marks the enrollment's generation failed, and returns the error tagged with
//! the job id. Prior active content is only replaced inside the final swap, so
//! a failed run leaves it untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auxiliary::SideEffects;
use crate::enrollment::sync::EnrollmentSynchronizer;
use crate::errors::AppError;
use crate::generation::generator::{
    build_prompt, ContentGenerationClient, GenerationOutput, PersonalizationOptions,
};
use crate::generation::in_flight::InFlightRegistry;
use crate::jobs::ledger::JobLedger;
use crate::models::content::GeneratedContent;
use crate::models::job::JobStatus;
use crate::models::learner::{Course, Learner};
use crate::store::{bounded, PipelineStore};

pub const TOTAL_STEPS: i32 = 6;

#[derive(Debug, Clone, Deserialize)]
pub struct RegenerationRequest {
    pub course_id: String,
    pub learner_id: String,
    #[serde(default)]
    pub force_regenerate: bool,
    #[serde(default)]
    pub personalization_options: PersonalizationOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub content_id: Option<Uuid>,
    pub reused_existing: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// Used when the request does not say whether personalization is required.
    pub require_personalization: bool,
    pub store_timeout: Duration,
}

/// Content the run ended on.
struct RunResult {
    content: GeneratedContent,
    reused_existing: bool,
}

pub struct RegenerationCoordinator {
    store: Arc<dyn PipelineStore>,
    ledger: JobLedger,
    enrollments: EnrollmentSynchronizer,
    generator: ContentGenerationClient,
    side_effects: SideEffects,
    in_flight: InFlightRegistry,
    settings: CoordinatorSettings,
}

impl RegenerationCoordinator {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        ledger: JobLedger,
        enrollments: EnrollmentSynchronizer,
        generator: ContentGenerationClient,
        side_effects: SideEffects,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            enrollments,
            generator,
            side_effects,
            in_flight: InFlightRegistry::new(),
            settings,
        }
    }

    pub async fn start_regeneration(
        &self,
        request: RegenerationRequest,
    ) -> Result<RegenerationOutcome, AppError> {
        let learner_id = request.learner_id.trim().to_string();
        let course_id = request.course_id.trim().to_string();
        if learner_id.is_empty() || course_id.is_empty() {
            return Err(AppError::Validation(
                "learner_id and course_id are required".to_string(),
            ));
        }
        request.personalization_options.validate()?;

        let _claim = self
            .in_flight
            .try_acquire(&learner_id, &course_id)
            .ok_or_else(|| AppError::RegenerationInProgress {
                learner_id: learner_id.clone(),
                course_id: course_id.clone(),
            })?;

        let learner = bounded(
            self.settings.store_timeout,
            "get_learner",
            self.store.get_learner(&learner_id),
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Learner {learner_id} not found")))?;

        let course = bounded(
            self.settings.store_timeout,
            "get_course",
            self.store.get_course(&course_id),
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Course {course_id} not found")))?;

        let metadata = json!({
            "force_regenerate": request.force_regenerate,
            "personalization_options": request.personalization_options,
        });
        let job_id = self
            .ledger
            .create_job(&learner_id, &course_id, TOTAL_STEPS, metadata)
            .await?;

        info!(
            "Regeneration job {} started for learner {} / course {} (force={})",
            job_id, learner_id, course_id, request.force_regenerate
        );

        let result = match self.run(job_id, &request, &learner, &course).await {
            Ok(result) => result,
            Err(e) => return Err(self.abort(job_id, &learner_id, &course_id, e).await),
        };

        let job = match self.ledger.complete(job_id).await {
            Ok(job) => job,
            Err(e) => return Err(self.abort(job_id, &learner_id, &course_id, e).await),
        };

        if !result.reused_existing {
            self.side_effects.content_ready(job_id, &result.content);
        }

        Ok(RegenerationOutcome {
            job_id,
            status: job.status,
            content_id: Some(result.content.id),
            reused_existing: result.reused_existing,
        })
    }

    async fn run(
        &self,
        job_id: Uuid,
        request: &RegenerationRequest,
        learner: &Learner,
        course: &Course,
    ) -> Result<RunResult, AppError> {
        let (learner_id, course_id) = (learner.id.as_str(), course.id.as_str());
        let options = &request.personalization_options;

        self.enrollments
            .begin_generation(learner_id, course_id, job_id)
            .await?;

        let inputs = bounded(
            self.settings.store_timeout,
            "get_personalization_inputs",
            self.store.get_personalization_inputs(learner_id),
        )
        .await?;
        if inputs.is_empty() && options.requires_personalization(self.settings.require_personalization)
        {
            return Err(AppError::MissingPersonalizationData(format!(
                "learner {learner_id} has no profile, skills or CV data"
            )));
        }
        self.ledger
            .advance(job_id, 2, 25, "Personalization inputs gathered")
            .await?;

        let existing = bounded(
            self.settings.store_timeout,
            "get_active_content",
            self.store.get_active_content(learner_id, course_id),
        )
        .await?;

        let retired = match existing {
            Some(content) if !request.force_regenerate => {
                info!(
                    "Job {}: reusing active content {} (force_regenerate not set)",
                    job_id, content.id
                );
                self.ledger
                    .annotate(job_id, json!({ "reused_existing": true }))
                    .await?;
                self.enrollments
                    .complete_generation(learner_id, course_id, job_id, &content)
                    .await?;
                return Ok(RunResult {
                    content,
                    reused_existing: true,
                });
            }
            Some(content) => vec![content.id],
            None => Vec::new(),
        };
        let staged = if retired.is_empty() {
            "No prior content to replace"
        } else {
            "Prior content staged for replacement"
        };
        self.ledger.advance(job_id, 3, 35, staged).await?;

        let prompt = build_prompt(course, learner, &inputs, options)?;
        self.ledger
            .advance(job_id, 4, 50, "Generation request sent")
            .await?;

        let output = self.generate_with_retry(job_id, &prompt).await?;
        self.ledger
            .advance(job_id, 5, 70, "Generation response received")
            .await?;
        self.ledger
            .annotate(
                job_id,
                json!({ "model": output.model, "usage": output.usage }),
            )
            .await?;

        let content = GeneratedContent {
            id: Uuid::new_v4(),
            course_id: course_id.to_string(),
            learner_id: learner_id.to_string(),
            title: output.payload.title,
            description: output.payload.description,
            learning_objectives: output.payload.learning_objectives,
            sections: output.payload.sections,
            source_job_id: job_id,
            is_active: false,
            created_at: Utc::now(),
        };

        bounded(
            self.settings.store_timeout,
            "swap_active_content",
            self.store.swap_active_content(&content, &retired),
        )
        .await?;
        self.ledger
            .advance(job_id, 6, 90, "Content persisted and activated")
            .await?;

        self.enrollments
            .complete_generation(learner_id, course_id, job_id, &content)
            .await?;

        Ok(RunResult {
            content: GeneratedContent {
                is_active: true,
                ..content
            },
            reused_existing: false,
        })
    }

    /// One provider attempt, plus exactly one more if the first failed transiently.
    async fn generate_with_retry(
        &self,
        job_id: Uuid,
        prompt: &str,
    ) -> Result<GenerationOutput, AppError> {
        match self.generator.generate(prompt).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_retryable() => {
                warn!("Job {}: generation attempt 1/2 failed ({}), retrying", job_id, e);
                Ok(self.generator.generate(prompt).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records a failure after the job exists and tags the error with its id.
    async fn abort(
        &self,
        job_id: Uuid,
        learner_id: &str,
        course_id: &str,
        error: AppError,
    ) -> AppError {
        let message = error.root().to_string();

        if let Err(e) = self.ledger.fail(job_id, &message).await {
            error!("Failed to mark job {} as failed: {}", job_id, e);
        }
        if let Err(e) = self
            .enrollments
            .fail_generation(learner_id, course_id, job_id)
            .await
        {
            error!(
                "Failed to mark generation failed on enrollment {} / {}: {}",
                learner_id, course_id, e
            );
        }
        self.side_effects
            .generation_failed(job_id, learner_id, course_id, &message);

        error.for_job(job_id)
    }
}
