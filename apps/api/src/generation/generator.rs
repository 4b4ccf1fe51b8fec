//! External generation client.
//!
//! Builds a deterministic prompt from course, learner and preferences, makes
//! one bounded provider call, and validates the response against the content
//! contract. Retry policy lives with the caller (`coordinator`).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::generation::contract::{validate_payload, ContractViolation, GeneratedPayload};
use crate::generation::prompts::{
    CONTENT_GENERATION_SYSTEM, CONTENT_PROMPT_TEMPLATE, GENERIC_LEARNER_NOTE,
};
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::{parse_json_text, CompletionProvider, CompletionRequest, LlmError, Usage};
use crate::models::learner::{Course, Learner, PersonalizationInputs};

pub const DEFAULT_MAX_SECTIONS: u32 = 8;
pub const MAX_SECTIONS_LIMIT: u32 = 20;

// ────────────────────────────────────────────────────────────────────────────
// Request-side types
// ────────────────────────────────────────────────────────────────────────────

/// Caller-supplied tailoring preferences. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalizationOptions {
    /// Overrides the service default for requiring learner data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_personalization: Option<bool>,
    pub focus_areas: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sections: Option<u32>,
}

impl PersonalizationOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(max) = self.max_sections {
            if !(1..=MAX_SECTIONS_LIMIT).contains(&max) {
                return Err(AppError::Validation(format!(
                    "max_sections must be between 1 and {MAX_SECTIONS_LIMIT}, got {max}"
                )));
            }
        }
        if self.focus_areas.iter().any(|f| f.trim().is_empty()) {
            return Err(AppError::Validation(
                "focus_areas must not contain blank entries".to_string(),
            ));
        }
        Ok(())
    }

    pub fn requires_personalization(&self, service_default: bool) -> bool {
        self.require_personalization.unwrap_or(service_default)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Hard bound on a single provider call.
    pub timeout: Duration,
}

/// A validated payload plus provider accounting.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub payload: GeneratedPayload,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl GenerationError {
    /// Only transient provider failures are worth a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Provider(e) if e.is_transient())
    }
}

impl From<GenerationError> for AppError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Provider(e) => e.into(),
            GenerationError::Contract(v) => v.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ContentGenerationClient {
    provider: Arc<dyn CompletionProvider>,
    settings: GenerationSettings,
}

impl ContentGenerationClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }

    /// One provider attempt, bounded by the configured timeout.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationOutput, GenerationError> {
        let request = CompletionRequest {
            system: CONTENT_GENERATION_SYSTEM,
            prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let completion =
            match tokio::time::timeout(self.settings.timeout, self.provider.complete(request)).await
            {
                Ok(result) => result?,
                Err(_) => return Err(LlmError::Timeout.into()),
            };

        let value: Value = parse_json_text(&completion.text)?;
        let payload = validate_payload(&value)?;

        info!(
            "Generated {} sections with model {} ({} tokens)",
            payload.sections.len(),
            completion.model,
            completion.usage.total_tokens
        );

        Ok(GenerationOutput {
            payload,
            model: completion.model,
            usage: completion.usage,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Prompt construction
// ────────────────────────────────────────────────────────────────────────────

/// Fills the generation template. Identical inputs always give identical text.
pub fn build_prompt(
    course: &Course,
    learner: &Learner,
    inputs: &PersonalizationInputs,
    options: &PersonalizationOptions,
) -> Result<String, AppError> {
    let course_json = to_pretty(
        &json!({
            "title": course.title,
            "description": course.description,
            "objectives": course.objectives,
            "difficulty": options.difficulty.as_ref().or(course.difficulty.as_ref()),
        }),
        "course",
    )?;

    let learner_json = if inputs.is_empty() {
        GENERIC_LEARNER_NOTE.to_string()
    } else {
        let mut skills = inputs.skills.clone();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        to_pretty(
            &json!({
                "role": learner.role,
                "department": learner.department,
                "experience_level": learner.experience_level,
                "profile": inputs.profile,
                "skills": skills,
                "cv_profile": inputs.extracted_profile,
            }),
            "learner",
        )?
    };

    let preferences_json = to_pretty(
        &json!({
            "learning_style": options.learning_style,
            "difficulty": options.difficulty,
        }),
        "preferences",
    )?;

    let focus_instruction = if options.focus_areas.is_empty() {
        String::new()
    } else {
        format!(
            "- Give extra depth to these focus areas: {}.",
            options.focus_areas.join(", ")
        )
    };

    let max_sections = options.max_sections.unwrap_or(DEFAULT_MAX_SECTIONS);
    debug!(
        "Building generation prompt for course {} (max {} sections)",
        course.id, max_sections
    );

    Ok(CONTENT_PROMPT_TEMPLATE
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{course_json}", &course_json)
        .replace("{learner_json}", &learner_json)
        .replace("{preferences_json}", &preferences_json)
        .replace("{max_sections}", &max_sections.to_string())
        .replace("{focus_instruction}", &focus_instruction))
}

fn to_pretty(value: &Value, what: &str) -> Result<String, AppError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize {what}: {e}")))
}
