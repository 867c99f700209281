//! Gemini REST client
//!
//! Implements [`LanguageModel`] over the `generateContent` endpoint.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{parse_json_payload, LanguageModel, OutputSchema, ToolSpec};
use crate::config::ModelConfig;
use crate::error::OrchestrationError;
use crate::messages::{Message, Role, ToolCall};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: i32,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }

    fn generation_config(&self, schema: Option<&OutputSchema>) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: self.max_output_tokens,
            response_mime_type: schema.map(|_| "application/json".to_string()),
            response_schema: schema.map(|s| s.schema.clone()),
        }
    }

    async fn call(&self, request: &GeminiRequest) -> Result<Candidate> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        debug!(model = %self.model, turns = request.contents.len(), "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        let candidate = gemini_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| OrchestrationError::LlmError("No response from Gemini API".to_string()))?;

        info!(finish_reason = ?candidate.finish_reason, "Gemini response received");
        Ok(candidate)
    }
}

#[async_trait::async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let request = build_request(messages, None, self.generation_config(None));
        let candidate = self.call(&request).await?;
        Ok(candidate.text())
    }

    async fn generate_with_tools(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message> {
        let request = build_request(messages, Some(tools), self.generation_config(None));
        let candidate = self.call(&request).await?;
        Ok(Message::assistant_with_tools(candidate.text(), candidate.tool_calls()))
    }

    async fn extract(&self, messages: &[Message], schema: &OutputSchema) -> Result<Value> {
        let request = build_request(messages, None, self.generation_config(Some(schema)));
        let candidate = self.call(&request).await?;
        parse_json_payload(&candidate.text())
    }
}

// ============ Request mapping ============

/// Map the message log onto Gemini contents. System turns become the
/// system instruction; tool results are sent back as function responses.
fn build_request(
    messages: &[Message],
    tools: Option<&[ToolSpec]>,
    generation_config: GenerationConfig,
) -> GeminiRequest {
    let system_text: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let contents = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(to_content)
        .collect();

    let tools = tools.filter(|t| !t.is_empty()).map(|specs| {
        vec![ToolDeclarations {
            function_declarations: specs
                .iter()
                .map(|s| FunctionDeclaration {
                    name: s.name.clone(),
                    description: s.description.clone(),
                    parameters: s.parameters.clone(),
                })
                .collect(),
        }]
    });

    GeminiRequest {
        contents,
        generation_config,
        system_instruction: (!system_text.is_empty()).then(|| SystemInstruction {
            parts: vec![Part::text(system_text.join("\n\n"))],
        }),
        tools,
    }
}

fn to_content(message: &Message) -> Content {
    match message.role {
        Role::Assistant => {
            let mut parts = Vec::new();
            if !message.content.is_empty() {
                parts.push(Part::text(message.content.clone()));
            }
            parts.extend(message.tool_calls.iter().map(|call| Part {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                }),
                ..Part::default()
            }));
            Content {
                role: Some("model".to_string()),
                parts,
            }
        }
        Role::Tool => Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                function_response: Some(FunctionResponse {
                    name: message.name.clone().unwrap_or_default(),
                    response: json!({ "content": message.content }),
                }),
                ..Part::default()
            }],
        },
        Role::User | Role::System => Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(message.content.clone())],
        },
    }
}

// ============ Wire types ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

impl Candidate {
    fn text(&self) -> String {
        self.content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .parts
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .map(|call| ToolCall {
                id: Uuid::new_v4().to_string(),
                name: call.name.clone(),
                args: call.args.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}
