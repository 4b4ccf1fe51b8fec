pub mod content;
pub mod enrollment;
pub mod job;
pub mod learner;

use crate::errors::AppError;

/// Error for a TEXT column holding a value outside an enum's vocabulary.
pub(crate) fn unknown_variant(kind: &str, value: &str) -> AppError {
    AppError::Persistence(format!("unknown {kind} '{value}' in store"))
}
