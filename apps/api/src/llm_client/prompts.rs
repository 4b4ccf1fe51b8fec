// Shared prompt fragments.
// Each service that needs LLM calls defines its own prompts.rs alongside it;
// this file holds the cross-cutting pieces.

/// Instruction appended to every personalized generation prompt.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Tailor examples, pacing and emphasis to the learner profile provided. \
    Do NOT invent facts about the learner that are not present in the profile. \
    If a profile field is absent, do not guess it.";
