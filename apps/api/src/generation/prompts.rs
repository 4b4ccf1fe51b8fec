// All LLM prompt constants for the Generation module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for personalized course generation. Enforces JSON-only output.
pub const CONTENT_GENERATION_SYSTEM: &str =
    "You are an expert instructional designer who adapts corporate training \
    courses to an individual learner. \
    You MUST respond with a single valid JSON object only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Generation prompt template. Every `{placeholder}` is replaced before sending.
pub const CONTENT_PROMPT_TEMPLATE: &str = r#"Rewrite the course below as a personalized learning path for this learner.

{grounding_instruction}

COURSE:
{course_json}

LEARNER:
{learner_json}

PREFERENCES:
{preferences_json}

Return a JSON object with this EXACT schema (no extra fields):
{
  "title": "Personalized course title",
  "description": "One paragraph describing what this learner will get out of the course",
  "learning_objectives": ["Objective phrased for this learner"],
  "sections": [
    {
      "module_id": "m1",
      "title": "Section title",
      "body": "Full section content, with examples drawn from the learner's role"
    }
  ]
}

Rules:
- Produce between 1 and {max_sections} sections, in the order the learner should study them.
- Every "module_id" must be unique within the response and must not change meaning between sections.
- Every section must have a non-empty "title" and "body".
- Keep the course's original objectives covered; personalization changes emphasis, not scope.
{focus_instruction}"#;

/// Used in place of the learner block when no personalization data exists and
/// the request allowed proceeding without it.
pub const GENERIC_LEARNER_NOTE: &str =
    "No learner profile is available. Produce general-purpose content for the course audience.";
