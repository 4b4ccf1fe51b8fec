use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ordered section (module) of generated course content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSection {
    pub module_id: String,
    pub title: String,
    pub body: String,
    pub order_index: i32,
}

/// A generated, personalized version of a course for one learner.
/// At most one row per (course, learner) has `is_active = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub id: Uuid,
    pub course_id: String,
    pub learner_id: String,
    pub title: String,
    pub description: String,
    pub learning_objectives: Vec<String>,
    pub sections: Vec<ContentSection>,
    pub source_job_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl GeneratedContent {
    pub fn has_module(&self, module_id: &str) -> bool {
        self.sections.iter().any(|s| s.module_id == module_id)
    }

    pub fn unit_count(&self) -> i32 {
        self.sections.len() as i32
    }
}
