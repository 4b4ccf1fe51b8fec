//! Progress tracking: records unit completions, recomputes enrollment progress
//! and triggers status reassessment on significant movement.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::enrollment::sync::{EnrollmentSynchronizer, ProgressRecord};
use crate::errors::AppError;
use crate::models::content::GeneratedContent;
use crate::models::enrollment::{DerivedStatus, Enrollment};
use crate::store::{bounded, PipelineStore, UnitCompletion};
use crate::tasks::dispatcher::{TaskDispatcher, TaskOutcome, TaskRequest};
use crate::tasks::status::StatusReassessmentRequest;

/// Progress movement (in points, either direction) within a single update
/// that triggers a reassessment.
pub const REASSESSMENT_THRESHOLD: i32 = 10;

/// Attempts to record a unit while regenerations keep replacing the content.
const MAX_CONTENT_ATTEMPTS: usize = 3;

pub fn should_reassess(previous_progress: i32, new_progress: i32) -> bool {
    (new_progress - previous_progress).abs() >= REASSESSMENT_THRESHOLD
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressUpdateRequest {
    pub learner_id: String,
    pub course_id: String,
    pub unit_id: String,
    pub completed: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdateResponse {
    pub progress_percent: i32,
    pub completed_units: i32,
    pub total_units: i32,
    pub derived_status: DerivedStatus,
    pub derived_status_changed: bool,
}

pub struct ProgressTracker {
    store: Arc<dyn PipelineStore>,
    enrollments: EnrollmentSynchronizer,
    dispatcher: Arc<TaskDispatcher>,
    store_timeout: Duration,
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        enrollments: EnrollmentSynchronizer,
        dispatcher: Arc<TaskDispatcher>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            enrollments,
            dispatcher,
            store_timeout,
        }
    }

    pub async fn update_progress(
        &self,
        request: ProgressUpdateRequest,
    ) -> Result<ProgressUpdateResponse, AppError> {
        let learner_id = request.learner_id.trim();
        let course_id = request.course_id.trim();
        let unit_id = request.unit_id.trim();
        if learner_id.is_empty() || course_id.is_empty() {
            return Err(AppError::Validation(
                "learner_id and course_id are required".to_string(),
            ));
        }
        if unit_id.is_empty() {
            return Err(AppError::Validation("unit_id must not be blank".to_string()));
        }

        for attempt in 1..=MAX_CONTENT_ATTEMPTS {
            let content = self.active_content(learner_id, course_id).await?;
            if !content.has_module(unit_id) {
                return Err(AppError::Validation(format!(
                    "unit {unit_id} is not part of the active content"
                )));
            }

            let change = UnitCompletion {
                unit_id: unit_id.to_string(),
                completed: request.completed,
                at: request.timestamp,
            };
            match self
                .enrollments
                .record_unit_completion(learner_id, course_id, &content, change)
                .await?
            {
                ProgressRecord::Applied {
                    previous_progress,
                    enrollment,
                } => return Ok(self.respond(previous_progress, enrollment).await),
                ProgressRecord::ContentChanged => debug!(
                    "Active content for {} / {} changed during progress update (attempt {})",
                    learner_id, course_id, attempt
                ),
            }
        }

        Err(AppError::RegenerationInProgress {
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
        })
    }

    /// The content the pair's enrollment currently points at.
    async fn active_content(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<GeneratedContent, AppError> {
        let enrollment = bounded(
            self.store_timeout,
            "get_enrollment",
            self.store.get_enrollment(learner_id, course_id),
        )
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No enrollment for learner {learner_id} in course {course_id}"
            ))
        })?;

        match enrollment.active_content_id {
            Some(content_id) => {
                bounded(
                    self.store_timeout,
                    "get_content",
                    self.store.get_content(content_id),
                )
                .await?
            }
            None => None,
        }
        .ok_or_else(|| {
            AppError::Validation(format!(
                "learner {learner_id} has no active content for course {course_id}"
            ))
        })
    }

    /// Builds the response, reassessing when this update moved progress far
    /// enough from the value it replaced.
    async fn respond(&self, previous_progress: i32, updated: Enrollment) -> ProgressUpdateResponse {
        let mut response = ProgressUpdateResponse {
            progress_percent: updated.progress_percent,
            completed_units: updated.completed_units,
            total_units: updated.total_units,
            derived_status: updated.derived_status,
            derived_status_changed: false,
        };

        if should_reassess(previous_progress, updated.progress_percent) {
            let reassessment = StatusReassessmentRequest {
                learner_id: updated.learner_id.clone(),
                course_id: updated.course_id.clone(),
                current_progress: updated.progress_percent,
                previous_progress,
                completed_units: updated.completed_units,
                total_units: updated.total_units,
            };
            self.reassess(reassessment, &mut response).await;
        }
        response
    }

    /// A failed reassessment is logged and the prior status kept; the progress
    /// update itself has already been stored.
    async fn reassess(
        &self,
        request: StatusReassessmentRequest,
        response: &mut ProgressUpdateResponse,
    ) {
        let (learner_id, course_id) = (request.learner_id.clone(), request.course_id.clone());
        let progress = request.current_progress;

        let result = match self
            .dispatcher
            .dispatch(TaskRequest::DetermineStatus(request))
            .await
        {
            Ok(TaskOutcome::DetermineStatus(result)) => result,
            Err(e) => {
                error!(
                    "Status reassessment for {} / {} failed, keeping {}: {}",
                    learner_id, course_id, response.derived_status, e
                );
                return;
            }
        };

        match self
            .enrollments
            .record_assessment(&learner_id, &course_id, result.derived_status, progress)
            .await
        {
            Ok(stored) => {
                response.derived_status_changed = stored.derived_status != response.derived_status;
                if response.derived_status_changed {
                    info!(
                        "Derived status for {} / {} changed {} -> {}: {}",
                        learner_id,
                        course_id,
                        response.derived_status,
                        stored.derived_status,
                        result.rationale.join("; ")
                    );
                }
                response.derived_status = stored.derived_status;
            }
            Err(e) => error!(
                "Failed to store reassessment for {} / {}, keeping {}: {}",
                learner_id, course_id, response.derived_status, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::ContentSection;
    use crate::models::enrollment::{progress_for, ContentGenerationStatus};
    use crate::store::memory::MemoryStore;
    use crate::tasks::dispatcher::{TaskHandler, TaskKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        last: Mutex<Option<StatusReassessmentRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, request: TaskRequest) -> Result<TaskOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let TaskRequest::DetermineStatus(request) = request;
            *self.last.lock() = Some(request);
            if self.fail {
                return Err(AppError::Internal(anyhow::anyhow!("handler crashed")));
            }
            Ok(TaskOutcome::DetermineStatus(
                crate::tasks::status::StatusReassessmentResult {
                    derived_status: DerivedStatus::AtRisk,
                    rationale: vec!["test".to_string()],
                },
            ))
        }
    }

    fn content_with(units: usize) -> GeneratedContent {
        GeneratedContent {
            id: Uuid::new_v4(),
            course_id: "c1".to_string(),
            learner_id: "e1".to_string(),
            title: "T".to_string(),
            description: String::new(),
            learning_objectives: vec![],
            sections: (0..units)
                .map(|i| ContentSection {
                    module_id: format!("m{i}"),
                    title: format!("Section {i}"),
                    body: "...".to_string(),
                    order_index: i as i32,
                })
                .collect(),
            source_job_id: Uuid::new_v4(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Enrollment on content with `units` sections, `done` of them completed
    /// and reflected in the stored counters, last assessed at `assessed`.
    fn setup(
        units: usize,
        done: usize,
        assessed: i32,
        handler: Arc<Counting>,
    ) -> (Arc<MemoryStore>, ProgressTracker) {
        let store = Arc::new(MemoryStore::new());
        let content = content_with(units);

        let mut enrollment = Enrollment::new("e1", "c1", Utc::now());
        enrollment.content_generation_status = ContentGenerationStatus::Completed;
        enrollment.active_content_id = Some(content.id);
        enrollment.total_units = units as i32;
        enrollment.completed_units = done as i32;
        enrollment.progress_percent = progress_for(done as i32, units as i32);
        enrollment.assessed_progress = assessed;
        store.insert_content(content);
        store.put_enrollment(enrollment);
        for i in 0..done {
            store.mark_completed("e1", "c1", &format!("m{i}"));
        }

        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(TaskKind::DetermineStatus, handler);
        let tracker = ProgressTracker::new(
            store.clone(),
            EnrollmentSynchronizer::new(store.clone(), Duration::from_secs(5)),
            Arc::new(dispatcher),
            Duration::from_secs(5),
        );
        (store, tracker)
    }

    fn update(unit: &str, completed: bool) -> ProgressUpdateRequest {
        ProgressUpdateRequest {
            learner_id: "e1".to_string(),
            course_id: "c1".to_string(),
            unit_id: unit.to_string(),
            completed,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_twelve_point_move_triggers_reassessment() {
        // 3 of 8 units is 38%; the fourth moves progress to 50.
        let handler = Arc::new(Counting::default());
        let (_store, tracker) = setup(8, 3, 38, handler.clone());

        let response = tracker.update_progress(update("m3", true)).await.unwrap();
        assert_eq!(response.progress_percent, 50);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let sent = handler.last.lock().clone().unwrap();
        assert_eq!(sent.previous_progress, 38);
        assert_eq!(sent.current_progress, 50);
        assert_eq!(response.derived_status, DerivedStatus::AtRisk);
        assert!(response.derived_status_changed);
    }

    #[tokio::test]
    async fn test_five_point_move_does_not_trigger() {
        // 40 -> 45, with the last assessment taken at a different point.
        let handler = Arc::new(Counting::default());
        let (store, tracker) = setup(20, 8, 35, handler.clone());
        let response = tracker.update_progress(update("m8", true)).await.unwrap();

        assert_eq!(response.progress_percent, 45);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(!response.derived_status_changed);
        assert_eq!(response.derived_status, DerivedStatus::OnTrack);

        let stored = store.get_enrollment("e1", "c1").await.unwrap().unwrap();
        assert_eq!(stored.derived_status, DerivedStatus::OnTrack);
        assert_eq!(stored.assessed_progress, 35);
    }

    #[tokio::test]
    async fn test_small_steps_never_trigger() {
        // Three 4 point steps add up to 12, but no single update moves 10.
        let handler = Arc::new(Counting::default());
        let (_store, tracker) = setup(25, 3, 12, handler.clone());
        for unit in ["m3", "m4", "m5"] {
            tracker.update_progress(update(unit, true)).await.unwrap();
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_prior_status() {
        let handler = Arc::new(Counting {
            fail: true,
            ..Counting::default()
        });
        let (store, tracker) = setup(4, 0, 0, handler.clone());
        let response = tracker.update_progress(update("m0", true)).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.progress_percent, 25);
        assert_eq!(response.derived_status, DerivedStatus::OnTrack);
        assert!(!response.derived_status_changed);

        let stored = store.get_enrollment("e1", "c1").await.unwrap().unwrap();
        assert_eq!(stored.progress_percent, 25);
        assert_eq!(stored.assessed_progress, 0);
    }

    #[tokio::test]
    async fn test_repeated_completion_is_idempotent() {
        let handler = Arc::new(Counting::default());
        let (_store, tracker) = setup(10, 0, 0, handler.clone());
        tracker.update_progress(update("m0", true)).await.unwrap();
        let response = tracker.update_progress(update("m0", true)).await.unwrap();
        assert_eq!(response.completed_units, 1);
        assert_eq!(response.progress_percent, 10);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmarking_unit_lowers_progress() {
        let handler = Arc::new(Counting::default());
        let (_store, tracker) = setup(10, 3, 30, handler.clone());
        let response = tracker.update_progress(update("m2", false)).await.unwrap();
        assert_eq!(response.completed_units, 2);
        assert_eq!(response.progress_percent, 20);
        let sent = handler.last.lock().clone().unwrap();
        assert_eq!(sent.previous_progress, 30);
    }

    #[tokio::test]
    async fn test_content_swapped_mid_update_is_revalidated() {
        let handler = Arc::new(Counting::default());
        let (store, tracker) = setup(4, 1, 25, handler);
        let regenerated = content_with(10);
        let regenerated_id = regenerated.id;
        store.swap_after_next_read(regenerated);

        let response = tracker.update_progress(update("m1", true)).await.unwrap();
        assert_eq!(response.total_units, 10);
        assert_eq!(response.completed_units, 2);
        assert_eq!(response.progress_percent, 20);

        let stored = store.get_enrollment("e1", "c1").await.unwrap().unwrap();
        assert_eq!(stored.active_content_id, Some(regenerated_id));
        assert_eq!(stored.total_units, 10);
        assert_eq!(stored.completed_units, 2);
    }

    #[tokio::test]
    async fn test_unit_dropped_by_regeneration_is_rejected() {
        let handler = Arc::new(Counting::default());
        let (store, tracker) = setup(6, 0, 0, handler);
        store.swap_after_next_read(content_with(2));

        let err = tracker.update_progress(update("m5", true)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let stored = store.get_enrollment("e1", "c1").await.unwrap().unwrap();
        assert_eq!(stored.completed_units, 0);
    }

    #[tokio::test]
    async fn test_unknown_unit_rejected() {
        let handler = Arc::new(Counting::default());
        let (_store, tracker) = setup(3, 0, 0, handler);
        let err = tracker.update_progress(update("m99", true)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = tracker.update_progress(update("  ", true)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_enrollment_is_not_found() {
        let handler = Arc::new(Counting::default());
        let (_store, tracker) = setup(3, 0, 0, handler);
        let mut request = update("m0", true);
        request.course_id = "other".to_string();
        let err = tracker.update_progress(request).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_threshold_is_symmetric() {
        assert!(should_reassess(40, 50));
        assert!(should_reassess(50, 40));
        assert!(!should_reassess(40, 49));
        assert!(!should_reassess(40, 45));
    }
}
