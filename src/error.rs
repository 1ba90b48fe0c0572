//! Error types for mail triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Triage and follow-up pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A prompt template referenced a variable that was not supplied.
    #[error("Template '{template}' is missing variable '{variable}'")]
    Template { template: String, variable: String },

    /// The model answered with something that does not fit the stage's output.
    #[error("Could not parse {stage} output: {reason}")]
    OutputParse { stage: String, reason: String },

    #[error("Stage {stage} timed out after {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },

    /// A malformed allowed-host rule. Reported per rule.
    #[error("Invalid allowed-host rule '{host}': {reason}")]
    FilterConfig { host: String, reason: String },

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Mail source failed: {0}")]
    MailSource(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    /// Whether a caller-side retry policy may try the failed operation again.
    ///
    /// Template and filter-config errors are programmer/config errors and
    /// never succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Template { .. } | Self::FilterConfig { .. } | Self::NotFound { .. } => false,
            Self::OutputParse { .. }
            | Self::StageTimeout { .. }
            | Self::Retrieval(_)
            | Self::MailSource(_)
            | Self::Database(_) => true,
            Self::Llm(e) => !matches!(e, LlmError::AuthFailed { .. }),
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Template { .. } => "template",
            Self::OutputParse { .. } => "output_parse",
            Self::StageTimeout { .. } => "stage_timeout",
            Self::FilterConfig { .. } => "filter_config",
            Self::Retrieval(_) => "retrieval",
            Self::MailSource(_) => "mail_source",
            Self::NotFound { .. } => "not_found",
            Self::Llm(_) => "llm",
            Self::Database(_) => "database",
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_errors_are_fatal() {
        let err = PipelineError::Template {
            template: "relevancy.system".into(),
            variable: "context".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "template");
    }

    #[test]
    fn parse_and_timeout_errors_are_retryable() {
        let parse = PipelineError::OutputParse {
            stage: "relevancy".into(),
            reason: "not json".into(),
        };
        let timeout = PipelineError::StageTimeout {
            stage: "summarizer".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(parse.is_retryable());
        assert!(timeout.is_retryable());
    }

    #[test]
    fn auth_failures_are_not_retried() {
        let err = PipelineError::Llm(LlmError::AuthFailed {
            provider: "openai".into(),
        });
        assert!(!err.is_retryable());

        let rate = PipelineError::Llm(LlmError::RateLimited {
            provider: "openai".into(),
            retry_after: None,
        });
        assert!(rate.is_retryable());
    }

    #[test]
    fn error_messages_name_the_problem() {
        let err = PipelineError::FilterConfig {
            host: "([".into(),
            reason: "unclosed group".into(),
        };
        assert!(err.to_string().contains("(["));
        assert!(err.to_string().contains("unclosed group"));
    }
}
