//! Proposal Copilot: email triage, scoping and proposal drafting with a
//! human approval gate.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod workflow;
