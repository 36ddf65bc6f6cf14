//! Error types for the proposal copilot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to fetch from channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Text completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

/// Intake/dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Channel fetch failed: {0}")]
    ChannelFetch(String),

    #[error("Storage failed: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Workflow failed: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Orchestrator errors.
///
/// Model failures never show up here; every step absorbs them into its
/// fallback. Only a broken stage precondition is reported.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Stage {stage} precondition violated: {reason}")]
    ContractViolation { stage: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_wraps_database_error() {
        let err: PipelineError = DatabaseError::Query("boom".into()).into();
        assert_eq!(err.to_string(), "Storage failed: Query failed: boom");
    }

    #[test]
    fn contract_violation_names_stage() {
        let err = WorkflowError::ContractViolation {
            stage: "cost".into(),
            reason: "project plan missing".into(),
        };
        let top: Error = err.into();
        assert!(top.to_string().contains("Stage cost precondition violated"));
    }
}
