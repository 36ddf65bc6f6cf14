//! Deterministic completion backend for local runs and demos.
//!
//! Routes on the marker line each workflow prompt opens with and returns a
//! canned reply. Never touches the network.

use async_trait::async_trait;

use super::TextCompletionService;
use crate::error::LlmError;
use crate::workflow::prompts::{CLASSIFY_MARKER, EXTRACT_MARKER, PLAN_MARKER, PROPOSAL_MARKER};

const CLASSIFY_REPLY: &str = r#"{"is_valid": true, "confidence": 0.9, "reason": "Mock valid inquiry"}"#;

const EXTRACT_REPLY: &str = r#"{"client_name": "Mock User", "company": "Mock Corp", "project_type": "Web App", "requirements": ["Mock Req"], "timeline": "2 weeks", "budget": "$5000"}"#;

const PLAN_REPLY: &str = r#"{"phases": [{"name": "Phase 1", "tasks": ["Task A"], "duration": "1 week"}], "total_hours": 20, "complexity": "simple"}"#;

const PROPOSAL_REPLY: &str = "Dear Mock User,\n\n\
    Thanks for reaching out. We have reviewed your request and put together a short plan.\n\n\
    We can start next week.\n\n\
    Best regards,\n\
    Your Development Team";

const DEFAULT_REPLY: &str = "Mock response";

/// Canned-response backend selected with `LLM_PROVIDER=mock`.
#[derive(Debug, Default, Clone)]
pub struct MockCompletion;

impl MockCompletion {
    pub fn new() -> Self {
        Self
    }

    fn reply_for(prompt: &str) -> &'static str {
        if prompt.contains(CLASSIFY_MARKER) {
            CLASSIFY_REPLY
        } else if prompt.contains(EXTRACT_MARKER) {
            EXTRACT_REPLY
        } else if prompt.contains(PLAN_MARKER) {
            PLAN_REPLY
        } else if prompt.contains(PROPOSAL_MARKER) {
            PROPOSAL_REPLY
        } else {
            DEFAULT_REPLY
        }
    }
}

#[async_trait]
impl TextCompletionService for MockCompletion {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        Ok(Self::reply_for(prompt).to_string())
    }
}
