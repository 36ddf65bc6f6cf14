//! Email-to-proposal workflow.
//!
//! One run takes the five raw fields of an email, classifies it, and for a
//! genuine inquiry extracts the client profile, plans the project, prices it
//! and drafts a proposal for human review.

pub mod cost;
pub mod json;
pub mod orchestrator;
pub mod prompts;
pub mod state;
pub mod steps;

pub use orchestrator::WorkflowOrchestrator;
pub use state::{EmailInput, Stage, WorkflowState, WorkflowStep};
pub use steps::StepOutcome;
