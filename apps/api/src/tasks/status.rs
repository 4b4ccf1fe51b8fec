//! Status reassessment: derives on_track / at_risk / critical from a learner's
//! progress movement since the last assessment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::enrollment::{progress_for, DerivedStatus};
use crate::tasks::dispatcher::{TaskHandler, TaskOutcome, TaskRequest};

/// Forward progress at or above this mark counts as on track.
const ON_TRACK_FLOOR: i32 = 50;
/// Below this mark with no forward movement is critical.
const CRITICAL_FLOOR: i32 = 20;
const CRITICAL_REGRESSION: i32 = 20;
/// Tolerated gap between unit counters and reported progress.
const COUNTER_TOLERANCE: i32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReassessmentRequest {
    pub learner_id: String,
    pub course_id: String,
    pub current_progress: i32,
    pub previous_progress: i32,
    pub completed_units: i32,
    pub total_units: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReassessmentResult {
    pub derived_status: DerivedStatus,
    pub rationale: Vec<String>,
}

pub fn determine_status(
    request: &StatusReassessmentRequest,
) -> Result<StatusReassessmentResult, AppError> {
    validate(request)?;

    let current = request.current_progress;
    let delta = current - request.previous_progress;

    if current >= 100 {
        return Ok(StatusReassessmentResult {
            derived_status: DerivedStatus::OnTrack,
            rationale: vec!["course complete".to_string()],
        });
    }

    let mut critical = Vec::new();
    if delta <= -CRITICAL_REGRESSION {
        critical.push(format!("progress regressed by {} points", -delta));
    }
    if current < CRITICAL_FLOOR && delta <= 0 {
        critical.push(format!(
            "progress {current}% is below {CRITICAL_FLOOR}% with no forward movement"
        ));
    }

    let mut at_risk = Vec::new();
    if current < ON_TRACK_FLOOR {
        at_risk.push(format!("progress {current}% is below {ON_TRACK_FLOOR}%"));
    }
    if delta < 0 && delta > -CRITICAL_REGRESSION {
        at_risk.push(format!("progress regressed by {} points", -delta));
    }
    let unit_progress = progress_for(request.completed_units, request.total_units);
    if (unit_progress - current).abs() > COUNTER_TOLERANCE {
        at_risk.push(format!(
            "{}/{} units completed ({unit_progress}%) disagrees with reported {current}%",
            request.completed_units, request.total_units
        ));
    }

    let result = if !critical.is_empty() {
        critical.extend(at_risk);
        StatusReassessmentResult {
            derived_status: DerivedStatus::Critical,
            rationale: critical,
        }
    } else if !at_risk.is_empty() {
        StatusReassessmentResult {
            derived_status: DerivedStatus::AtRisk,
            rationale: at_risk,
        }
    } else {
        StatusReassessmentResult {
            derived_status: DerivedStatus::OnTrack,
            rationale: vec![format!("progress {current}% ({delta:+} since last assessment)")],
        }
    };
    Ok(result)
}

fn validate(request: &StatusReassessmentRequest) -> Result<(), AppError> {
    if request.learner_id.trim().is_empty() || request.course_id.trim().is_empty() {
        return Err(AppError::Validation(
            "learner_id and course_id are required".to_string(),
        ));
    }
    if request.total_units <= 0 {
        return Err(AppError::Validation("total_units must be positive".to_string()));
    }
    if request.completed_units < 0 || request.completed_units > request.total_units {
        return Err(AppError::Validation(format!(
            "completed_units {} is outside 0..={}",
            request.completed_units, request.total_units
        )));
    }
    for (name, value) in [
        ("current_progress", request.current_progress),
        ("previous_progress", request.previous_progress),
    ] {
        if !(0..=100).contains(&value) {
            return Err(AppError::Validation(format!(
                "{name} {value} is outside 0..=100"
            )));
        }
    }
    Ok(())
}

/// Registered under `TaskKind::DetermineStatus`.
pub struct StatusReassessmentTask;

#[async_trait]
impl TaskHandler for StatusReassessmentTask {
    async fn handle(&self, request: TaskRequest) -> Result<TaskOutcome, AppError> {
        let TaskRequest::DetermineStatus(request) = request;
        Ok(TaskOutcome::DetermineStatus(determine_status(&request)?))
    }
}
