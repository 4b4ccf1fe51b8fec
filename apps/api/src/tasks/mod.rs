// Background task dispatch. Each task kind has exactly one registered handler;
// status reassessment is the built-in one.

pub mod dispatcher;
pub mod handlers;
pub mod status;
