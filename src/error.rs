//! Error types for the claim orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool {0} not found in available tools")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Timed out after {0} ms: {1}")]
    Timeout(u64, String),

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Scoring error: {0}")]
    ScoringError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Workflow exceeded {0} node visits")]
    StepLimitExceeded(usize),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Bound a collaborator call. Elapsed time becomes `Timeout`.
pub async fn with_timeout<T, F>(limit: std::time::Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| OrchestrationError::Timeout(limit.as_millis() as u64, what.to_string()))?
}
