// Enrollment synchronization and learner progress tracking.
// Generation outcomes and unit completions both land on the enrollment row;
// this module owns every write to it.

pub mod handlers;
pub mod progress;
pub mod sync;
