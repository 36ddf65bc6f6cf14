//! The model-backed workflow steps.
//!
//! Each step issues at most one completion request and never fails: a
//! backend error, an empty reply or unparseable JSON all turn into a
//! [`StepOutcome::Fallback`] carrying a deterministic substitute output.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::json::parse_model_json;
use super::prompts::{self, ProposalContext};
use super::state::{Classification, ClientProfile, EmailInput, ProjectPlan};
use crate::error::LlmError;
use crate::llm::TextCompletionService;

/// Error recorded when classification gets nothing usable back from the model.
pub const EMPTY_RESPONSE_ERROR: &str = "Empty response from LLM";

/// Reason recorded when the model omits one.
const NO_REASON: &str = "No reason provided";

/// Result of one step: either the model's output, or a substitute plus the
/// reason the model output could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Completed(T),
    Fallback { output: T, reason: String },
}

impl<T> StepOutcome<T> {
    fn fallback(output: T, reason: impl Into<String>) -> Self {
        Self::Fallback {
            output,
            reason: reason.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn output(&self) -> &T {
        match self {
            Self::Completed(output) | Self::Fallback { output, .. } => output,
        }
    }

    pub fn into_output(self) -> T {
        match self {
            Self::Completed(output) | Self::Fallback { output, .. } => output,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    is_valid: bool,
    confidence: f64,
    #[serde(default)]
    reason: Option<String>,
}

/// Runs the four model-backed steps against one completion service.
pub struct WorkflowSteps {
    llm: Arc<dyn TextCompletionService>,
}

impl WorkflowSteps {
    pub fn new(llm: Arc<dyn TextCompletionService>) -> Self {
        Self { llm }
    }

    async fn call(&self, step: &'static str, prompt: &str) -> Result<String, LlmError> {
        debug!(step, backend = self.llm.name(), chars = prompt.len(), "Sending completion request");
        self.llm.complete(prompt).await
    }

    /// Decide whether the email is a genuine business inquiry.
    ///
    /// A failed call or an empty reply records [`EMPTY_RESPONSE_ERROR`];
    /// a reply that does not parse records the parse error.
    pub async fn classify(&self, email: &EmailInput) -> StepOutcome<Classification> {
        let prompt = prompts::build_classify_prompt(email);

        let response = match self.call("classify", &prompt).await {
            Ok(response) if !response.is_empty() => response,
            Ok(_) => return StepOutcome::fallback(Classification::rejected(), EMPTY_RESPONSE_ERROR),
            Err(e) => {
                warn!(email_id = %email.email_id, error = %e, "Classification call failed");
                return StepOutcome::fallback(Classification::rejected(), EMPTY_RESPONSE_ERROR);
            }
        };

        match parse_model_json::<ClassificationResponse>(&response) {
            Ok(parsed) => StepOutcome::Completed(Classification {
                is_valid: parsed.is_valid,
                confidence: parsed.confidence,
                reason: Some(parsed.reason.unwrap_or_else(|| NO_REASON.to_string())),
            }),
            Err(e) => StepOutcome::fallback(Classification::rejected(), e.to_string()),
        }
    }

    /// Pull client name, company, project type, requirements, timeline and
    /// budget out of the email.
    pub async fn extract(&self, email: &EmailInput) -> StepOutcome<ClientProfile> {
        let prompt = prompts::build_extract_prompt(email);

        match self.call("extract", &prompt).await {
            Ok(response) => match parse_model_json::<ClientProfile>(&response) {
                Ok(profile) => StepOutcome::Completed(profile),
                Err(e) => StepOutcome::fallback(ClientProfile::fallback(), e.to_string()),
            },
            Err(e) => StepOutcome::fallback(ClientProfile::fallback(), e.to_string()),
        }
    }

    /// Break the project into phases with an hour total and complexity band.
    pub async fn plan(&self, project_type: &str, requirements: &[String]) -> StepOutcome<ProjectPlan> {
        let prompt = prompts::build_plan_prompt(project_type, requirements);

        match self.call("plan", &prompt).await {
            Ok(response) => match parse_model_json::<ProjectPlan>(&response) {
                Ok(plan) => StepOutcome::Completed(plan),
                Err(e) => StepOutcome::fallback(ProjectPlan::fallback(), e.to_string()),
            },
            Err(e) => StepOutcome::fallback(ProjectPlan::fallback(), e.to_string()),
        }
    }

    /// Draft the proposal body. An empty reply counts as a failure so the
    /// reviewer always gets a letter.
    pub async fn propose(&self, ctx: &ProposalContext<'_>) -> StepOutcome<String> {
        let prompt = prompts::build_proposal_prompt(ctx);

        match self.call("propose", &prompt).await {
            Ok(text) if !text.trim().is_empty() => StepOutcome::Completed(text),
            Ok(_) => StepOutcome::fallback(
                prompts::render_fallback_proposal(ctx),
                EMPTY_RESPONSE_ERROR,
            ),
            Err(e) => StepOutcome::fallback(prompts::render_fallback_proposal(ctx), e.to_string()),
        }
    }
}
