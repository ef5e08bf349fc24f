use serde::Serialize;
use thiserror::Error;

/// Crate-wide error type. Every failure surfaced to a caller goes through here so
/// the HTTP surface and the CLI can report a stable `{kind, message}` pair.
#[derive(Debug, Error)]
pub enum Text2SqlError {
    #[error("`prompt` must be a non-empty string")]
    EmptyPrompt,

    #[error("`chat_history` must contain at least one message")]
    EmptyChatHistory,

    #[error("Shots must be a non-negative integer.")]
    NonNegativeShotsRequired,

    #[error("Unsupported format schema type: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid chat: {0}")]
    InvalidChat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{provider} API error: {detail}")]
    ApiFailure { provider: String, detail: String },

    #[error("All {provider} API keys quota-exhausted")]
    QuotaExceeded { provider: String },

    #[error("Database file not found: {0}")]
    InvalidDatabasePath(String),

    #[error("Schema file not found: {0}")]
    SchemaFileNotFound(String),

    #[error("Database query error: {0}")]
    DatabaseQuery(String),

    #[error("Examples must be provided for `{prompt_type}`")]
    NoExamplesProvided { prompt_type: String },

    #[error("Prompt type '{0}' not found.")]
    PromptTypeNotFound(String),

    #[error("Error fetching examples: {0}")]
    Retriever(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Text2SqlError>;

impl Text2SqlError {
    /// Stable tag for the error family, suitable for log grepping and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Text2SqlError::EmptyPrompt
            | Text2SqlError::EmptyChatHistory
            | Text2SqlError::NonNegativeShotsRequired
            | Text2SqlError::UnsupportedFormat(_)
            | Text2SqlError::InvalidChat(_)
            | Text2SqlError::InvalidInput(_) => "InvalidInput",
            Text2SqlError::Config(_) => "ConfigError",
            Text2SqlError::ApiFailure { .. } => "APIFailure",
            Text2SqlError::QuotaExceeded { .. } => "QuotaExceeded",
            Text2SqlError::InvalidDatabasePath(_) => "InvalidDatabasePath",
            Text2SqlError::SchemaFileNotFound(_) => "SchemaFileNotFound",
            Text2SqlError::DatabaseQuery(_) => "DatabaseQueryError",
            Text2SqlError::NoExamplesProvided { .. } => "NoExamplesProvided",
            Text2SqlError::PromptTypeNotFound(_) => "PromptTypeNotFound",
            Text2SqlError::Retriever(_) => "RetrieverError",
            Text2SqlError::Template(_) | Text2SqlError::Internal(_) => "InternalError",
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        self.kind() == "InvalidInput"
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serialized error shape returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<rusqlite::Error> for Text2SqlError {
    fn from(e: rusqlite::Error) -> Self {
        Text2SqlError::DatabaseQuery(e.to_string())
    }
}

impl From<r2d2::Error> for Text2SqlError {
    fn from(e: r2d2::Error) -> Self {
        Text2SqlError::DatabaseQuery(e.to_string())
    }
}

impl From<minijinja::Error> for Text2SqlError {
    fn from(e: minijinja::Error) -> Self {
        Text2SqlError::Template(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Text2SqlError {
    fn from(e: tokio::task::JoinError) -> Self {
        Text2SqlError::Internal(format!("blocking task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_failure_message_is_templated() {
        let e = Text2SqlError::ApiFailure {
            provider: "anthropic".to_string(),
            detail: "status 500: boom".to_string(),
        };
        assert_eq!(e.to_string(), "anthropic API error: status 500: boom");
        assert_eq!(e.kind(), "APIFailure");
    }

    #[test]
    fn test_input_errors_share_a_kind() {
        assert!(Text2SqlError::EmptyPrompt.is_invalid_input());
        assert!(Text2SqlError::EmptyChatHistory.is_invalid_input());
        assert!(Text2SqlError::NonNegativeShotsRequired.is_invalid_input());
        assert!(Text2SqlError::UnsupportedFormat("xml".into()).is_invalid_input());
        assert!(!Text2SqlError::Config("x".into()).is_invalid_input());
    }

    #[test]
    fn test_error_body_shape() {
        let body = Text2SqlError::NoExamplesProvided {
            prompt_type: "dail_sql".to_string(),
        }
        .to_body();
        assert_eq!(body.kind, "NoExamplesProvided");
        assert_eq!(body.message, "Examples must be provided for `dail_sql`");
    }
}
