//! Language model collaborator
//!
//! The workflow only ever talks to a model through [`LanguageModel`]:
//! free-text completion, tool-bound completion that may return pending
//! tool invocations, and schema-constrained extraction.

pub mod gemini;

pub use gemini::GeminiClient;

use crate::error::{with_timeout, OrchestrationError};
use crate::messages::Message;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Declaration of a callable tool, as advertised to the model
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

/// Named JSON schema constraining a structured completion
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: &'static str, schema: Value) -> Self {
        Self { name, schema }
    }
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Free-text completion
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Completion with tools bound. The returned assistant message may
    /// carry zero or more pending tool calls.
    async fn generate_with_tools(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message>;

    /// Structured completion conforming to `schema`
    async fn extract(&self, messages: &[Message], schema: &OutputSchema) -> Result<Value>;
}

/// Structured extraction deserialized into `T`, bounded by `limit`
pub async fn extract_as<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    messages: &[Message],
    schema: &OutputSchema,
    limit: Duration,
) -> Result<T> {
    let value = with_timeout(limit, schema.name, model.extract(messages, schema)).await?;
    serde_json::from_value(value)
        .map_err(|e| OrchestrationError::ExtractionError(format!("{}: {}", schema.name, e)))
}

/// Parse a JSON object out of a completion that may be wrapped in a
/// markdown code fence.
pub fn parse_json_payload(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body)
        .map_err(|e| OrchestrationError::ExtractionError(format!("Invalid JSON payload: {}", e)))
}
