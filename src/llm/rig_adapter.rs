//! Bridges rig-core's `CompletionModel` to [`TextCompletionService`].

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel};

use super::TextCompletionService;
use crate::error::LlmError;

/// Adapter that sends each prompt as a single user message.
pub struct RigAdapter<M> {
    model: M,
    provider: &'static str,
    model_name: String,
    temperature: f64,
    max_tokens: u64,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, provider: &'static str, model_name: &str) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.to_string(),
            temperature: 0.3,
            max_tokens: 1000,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl<M> TextCompletionService for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.provider
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .model
            .completion_request(prompt.to_string())
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: format!("{} ({})", e, self.model_name),
            })?;

        // Tool calls and reasoning blocks are not part of a plain completion.
        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        tracing::debug!(
            provider = self.provider,
            model = %self.model_name,
            chars = text.len(),
            "Completion received"
        );
        Ok(text)
    }
}
