use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::unknown_variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Assigned,
    Active,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Assigned => "assigned",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
        }
    }

    /// Status implied by a progress percentage.
    pub fn for_progress(progress_percent: i32) -> Self {
        match progress_percent {
            p if p >= 100 => EnrollmentStatus::Completed,
            p if p > 0 => EnrollmentStatus::Active,
            _ => EnrollmentStatus::Assigned,
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(EnrollmentStatus::Assigned),
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            other => Err(unknown_variant("enrollment status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentGenerationStatus {
    None,
    InProgress,
    Completed,
    Failed,
}

impl ContentGenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentGenerationStatus::None => "none",
            ContentGenerationStatus::InProgress => "in_progress",
            ContentGenerationStatus::Completed => "completed",
            ContentGenerationStatus::Failed => "failed",
        }
    }
}

impl FromStr for ContentGenerationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ContentGenerationStatus::None),
            "in_progress" => Ok(ContentGenerationStatus::InProgress),
            "completed" => Ok(ContentGenerationStatus::Completed),
            "failed" => Ok(ContentGenerationStatus::Failed),
            other => Err(unknown_variant("content generation status", other)),
        }
    }
}

/// Coarse learner status derived from progress history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    OnTrack,
    AtRisk,
    Critical,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedStatus::OnTrack => "on_track",
            DerivedStatus::AtRisk => "at_risk",
            DerivedStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DerivedStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_track" => Ok(DerivedStatus::OnTrack),
            "at_risk" => Ok(DerivedStatus::AtRisk),
            "critical" => Ok(DerivedStatus::Critical),
            other => Err(unknown_variant("derived status", other)),
        }
    }
}

/// A learner's enrollment in a course. Natural key: (learner_id, course_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub learner_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub content_generation_status: ContentGenerationStatus,
    pub active_content_id: Option<Uuid>,
    /// The most recently started generation job for this pair.
    pub latest_job_id: Option<Uuid>,
    pub progress_percent: i32,
    pub completed_units: i32,
    pub total_units: i32,
    /// Progress at the last status reassessment.
    pub assessed_progress: i32,
    pub derived_status: DerivedStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// A fresh enrollment as created on first contact for a pair.
    pub fn new(learner_id: &str, course_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            status: EnrollmentStatus::Assigned,
            content_generation_status: ContentGenerationStatus::None,
            active_content_id: None,
            latest_job_id: None,
            progress_percent: 0,
            completed_units: 0,
            total_units: 0,
            assessed_progress: 0,
            derived_status: DerivedStatus::OnTrack,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Integer completion percentage, 0 when there are no units.
pub fn progress_for(completed_units: i32, total_units: i32) -> i32 {
    if total_units <= 0 {
        return 0;
    }
    let completed = completed_units.clamp(0, total_units);
    ((completed as f64 / total_units as f64) * 100.0).round() as i32
}
