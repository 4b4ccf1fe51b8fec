use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Learner identity as provided by the profile store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Learner {
    pub id: String,
    pub full_name: String,
    pub role: Option<String>,
    pub department: Option<String>,
    pub experience_level: Option<String>,
}

/// Course metadata as provided by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub objectives: Vec<String>,
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LearnerSkill {
    pub name: String,
    pub proficiency: Option<String>,
}

/// Learner-specific inputs used to tailor generated content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalizationInputs {
    /// Free-form profile document (background, goals, preferences).
    pub profile: Option<Value>,
    pub skills: Vec<LearnerSkill>,
    /// Structured data previously extracted from the learner's CV.
    pub extracted_profile: Option<Value>,
}

impl PersonalizationInputs {
    /// True when there is nothing learner-specific to personalize with.
    pub fn is_empty(&self) -> bool {
        !has_data(self.profile.as_ref())
            && self.skills.is_empty()
            && !has_data(self.extracted_profile.as_ref())
    }
}

fn has_data(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}
