// Job Ledger: one persisted record per generation attempt.
// Transitions are pure (state.rs); the ledger applies them against the store
// with terminal-state guards (ledger.rs).

pub mod handlers;
pub mod ledger;
pub mod state;
