// Personalized content regeneration.
// All provider calls go through llm_client; nothing here talks HTTP to the provider directly.

pub mod contract;
pub mod coordinator;
pub mod generator;
pub mod handlers;
pub mod in_flight;
pub mod prompts;
