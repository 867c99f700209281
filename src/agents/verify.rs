//! Claim verification
//!
//! Phase one binds the tools and lets the model request evidence. Once
//! tool results exist after the report, or the model asks for nothing,
//! phase two extracts a decision and hands it to the validator.

use crate::error::with_timeout;
use crate::llm::{extract_as, LanguageModel, OutputSchema, ToolSpec};
use crate::messages::{tool_results, Message};
use crate::models::{IntentResult, QueryContext, Report, VerificationDecision};
use crate::state::{StateUpdate, WorkflowState};
use crate::verification::{DecisionValidator, RawDecision};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DECISION_SCHEMA: &str = "verification_decision";

const DECISION_PROMPT: &str = r#"You are a BFSI claim verifier. Decide whether the customer's claim is valid using the report, the company documents it quotes and any tool results.

- is_valid: "Yes", "No" or "Low Confidence"
- resolution: the message to send the customer
- confidence: 0.0 to 1.0
- policy_citations: documents or policy numbers supporting the decision
- action_plan: create_ticket, ticket_type (complaint, service_request or feature_request; only when create_ticket is true), make_db_entry, call_refund_api, refund_amount, idempotency_key

Only approve a refund when the documents support it and the amount is known."#;

pub fn decision_schema() -> OutputSchema {
    OutputSchema::new(
        DECISION_SCHEMA,
        json!({
            "type": "OBJECT",
            "properties": {
                "is_valid": {"type": "STRING", "enum": ["Yes", "Low Confidence", "No"]},
                "resolution": {"type": "STRING"},
                "confidence": {"type": "NUMBER"},
                "policy_citations": {"type": "ARRAY", "items": {"type": "STRING"}},
                "action_plan": {
                    "type": "OBJECT",
                    "properties": {
                        "create_ticket": {"type": "BOOLEAN"},
                        "ticket_type": {"type": "STRING", "enum": ["complaint", "service_request", "feature_request"]},
                        "make_db_entry": {"type": "BOOLEAN"},
                        "call_refund_api": {"type": "BOOLEAN"},
                        "refund_amount": {"type": "NUMBER"},
                        "idempotency_key": {"type": "STRING"}
                    },
                    "required": ["create_ticket", "make_db_entry", "call_refund_api"]
                }
            },
            "required": ["is_valid", "resolution", "confidence", "policy_citations", "action_plan"]
        }),
    )
}

fn evidence_prompt(ctx: &QueryContext, tools: &[ToolSpec]) -> String {
    let tool_lines = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a BFSI claim verifier preparing to decide on a customer claim.

Before deciding, call the tools you need to gather evidence: look up the customer's account and policies, search the knowledge base for the relevant terms, or open a ticket when the case needs a human. If the report already holds enough evidence, reply without calling any tool.

Available tools:
{}

Customer user_id: {}
Customer email: {}"#,
        tool_lines,
        ctx.user_id.as_deref().unwrap_or("Not provided"),
        ctx.email.as_deref().unwrap_or("Not provided"),
    )
}

fn decision_context(intent: Option<&IntentResult>, report: &Report, messages: &[Message]) -> String {
    let mut parts = Vec::new();

    if let Some(intent) = intent {
        parts.push("=== INTENT & CLASSIFICATION ===".to_string());
        parts.push(format!(
            "Intent: {}, Urgency: {}, Sentiment: {}",
            intent.intent.as_str(),
            intent.urgency.as_str(),
            intent.sentiment.as_str()
        ));
    }

    parts.push("\n=== STRUCTURED REPORT ===".to_string());
    parts.push(serde_json::to_string_pretty(report).unwrap_or_else(|_| report.issue.clone()));

    let results: Vec<String> = tool_results(messages)
        .enumerate()
        .map(|(i, m)| {
            format!(
                "Tool {} ({}):\n{}",
                i + 1,
                m.name.as_deref().unwrap_or("unknown"),
                m.content
            )
        })
        .collect();
    if !results.is_empty() {
        parts.push("\n=== TOOL RESULTS ===".to_string());
        parts.extend(results);
    }

    parts.join("\n")
}

pub struct VerifyStage {
    model: Arc<dyn LanguageModel>,
    validator: DecisionValidator,
    timeout: Duration,
}

impl VerifyStage {
    pub fn new(model: Arc<dyn LanguageModel>, validator: DecisionValidator, timeout: Duration) -> Self {
        Self {
            model,
            validator,
            timeout,
        }
    }

    pub fn validator(&self) -> &DecisionValidator {
        &self.validator
    }

    /// Phase one: may return an assistant turn with pending tool calls
    pub async fn request_evidence(&self, state: &WorkflowState, report: &Report, tools: &[ToolSpec]) -> Result<Message> {
        let conversation = vec![
            Message::system(evidence_prompt(&state.context, tools)),
            Message::user(decision_context(state.intent_result.as_ref(), report, &state.messages)),
        ];
        with_timeout(
            self.timeout,
            "evidence request",
            self.model.generate_with_tools(&conversation, tools),
        )
        .await
    }

    /// Phase two: extract and validate a decision
    pub async fn decide(&self, state: &WorkflowState, report: &Report) -> Result<VerificationDecision> {
        let conversation = vec![
            Message::system(DECISION_PROMPT),
            Message::user(decision_context(state.intent_result.as_ref(), report, &state.messages)),
        ];
        let raw: RawDecision =
            extract_as(self.model.as_ref(), &conversation, &decision_schema(), self.timeout).await?;
        Ok(self.validator.validate(raw, state.intent_result.as_ref()))
    }

    pub async fn run(&self, state: &WorkflowState, tools: &[ToolSpec]) -> StateUpdate {
        let Some(report) = state.report.as_ref() else {
            warn!("No report available for verification");
            return self.decision_update(self.validator.fallback(state.intent_result.as_ref()));
        };

        if !state.has_tool_results_since_report() {
            match self.request_evidence(state, report, tools).await {
                Ok(message) if message.has_tool_calls() => {
                    info!(tool_calls = message.tool_calls.len(), "Verifier requested tools");
                    return StateUpdate::new().with_message(message);
                }
                Ok(_) => debug!("Verifier requested no tools"),
                Err(e) => {
                    warn!(error = %e, "Evidence request failed, proceeding with available information");
                }
            }
        }

        let decision = match self.decide(state, report).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Decision extraction failed");
                self.validator.fallback(state.intent_result.as_ref())
            }
        };
        self.decision_update(decision)
    }

    fn decision_update(&self, decision: VerificationDecision) -> StateUpdate {
        StateUpdate {
            final_answer: Some(decision.resolution.clone()),
            verification: Some(decision),
            ..StateUpdate::default()
        }
    }
}
