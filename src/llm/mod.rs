//! Text completion backends.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//! - **Mock**: deterministic canned responses, no network
//!
//! The workflow only ever sees [`TextCompletionService`]: a prompt goes in,
//! text comes out. The backend is picked once at startup from [`LlmConfig`];
//! there is no runtime probing and no silent fallback between backends.

pub mod mock;
mod rig_adapter;

pub use mock::MockCompletion;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, LlmError};

/// Default sampling temperature for every workflow step.
const DEFAULT_TEMPERATURE: f64 = 0.3;

/// Default completion cap.
const DEFAULT_MAX_TOKENS: u64 = 1000;

/// Opaque prompt-in/text-out collaborator used by the workflow steps.
///
/// Implementations may be shared across concurrent workflow runs and must
/// handle concurrent calls themselves.
#[async_trait]
pub trait TextCompletionService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Complete a single prompt. An empty string is a legal (if useless) reply.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Supported completion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
    Mock,
}

impl LlmBackend {
    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o-mini",
            Self::Mock => "mock",
        }
    }

    fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Mock => None,
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "mock" => Ok(Self::Mock),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".into(),
                message: format!("unknown provider '{other}' (expected anthropic, openai or mock)"),
            }),
        }
    }
}

/// Configuration for creating a completion service.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl LlmConfig {
    /// Config for the deterministic mock backend.
    pub fn mock() -> Self {
        Self {
            backend: LlmBackend::Mock,
            api_key: SecretString::from(String::new()),
            model: LlmBackend::Mock.default_model().to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Build config from environment variables.
    ///
    /// `LLM_PROVIDER` defaults to `anthropic`. The matching API key variable
    /// is required for the cloud backends.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "anthropic".to_string())
            .parse()?;

        let api_key = match backend.api_key_var() {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| ConfigError::MissingEnvVar(var.into()))?;
                SecretString::from(key)
            }
            None => SecretString::from(String::new()),
        };

        let model = std::env::var("LLM_MODEL")
            .unwrap_or_else(|_| backend.default_model().to_string());

        let temperature = match std::env::var("LLM_TEMPERATURE") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".into(),
                message: format!("{e}"),
            })?,
            Err(_) => DEFAULT_TEMPERATURE,
        };

        let max_tokens = match std::env::var("LLM_MAX_TOKENS") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "LLM_MAX_TOKENS".into(),
                message: format!("{e}"),
            })?,
            Err(_) => DEFAULT_MAX_TOKENS,
        };

        Ok(Self {
            backend,
            api_key,
            model,
            temperature,
            max_tokens,
        })
    }
}

/// Create a completion service from configuration.
pub fn create_service(config: &LlmConfig) -> Result<Arc<dyn TextCompletionService>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_service(config),
        LlmBackend::OpenAi => create_openai_service(config),
        LlmBackend::Mock => {
            tracing::info!("Using mock completion backend");
            Ok(Arc::new(MockCompletion::new()))
        }
    }
}

fn create_anthropic_service(
    config: &LlmConfig,
) -> Result<Arc<dyn TextCompletionService>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, "anthropic", &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens),
    ))
}

fn create_openai_service(config: &LlmConfig) -> Result<Arc<dyn TextCompletionService>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, "openai", &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens),
    ))
}
