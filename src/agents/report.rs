//! Structured report for complaints and service requests

use super::{format_kb_context, NO_DOCUMENTS};
use crate::llm::{extract_as, LanguageModel, OutputSchema};
use crate::messages::{last_user_text, user_turns, Message};
use crate::models::{KnowledgeDocument, Report};
use crate::state::{StateUpdate, WorkflowState};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const REPORT_SCHEMA: &str = "report";

const SYSTEM_PROMPT: &str = r#"You are a BFSI support analyst. Write a structured report of the customer's issue for a claim verifier.

- issue: what went wrong, in the customer's terms
- user_demand: what the customer wants done (refund, correction, explanation...)
- company_docs_about_issue: what the company documents say about this issue, quoting the relevant passages
- support_info_from_user: evidence the customer supplied (dates, amounts, reference numbers)
- policy_refs: policy numbers or document names that apply, or "Not specified"

Use only the information provided. Do not speculate about the outcome."#;

const DOC_EXCERPT_CHARS: usize = 500;

pub fn report_schema() -> OutputSchema {
    OutputSchema::new(
        REPORT_SCHEMA,
        json!({
            "type": "OBJECT",
            "properties": {
                "issue": {"type": "STRING"},
                "user_demand": {"type": "STRING"},
                "company_docs_about_issue": {"type": "STRING"},
                "support_info_from_user": {"type": "STRING"},
                "policy_refs": {"type": "STRING"}
            },
            "required": ["issue", "user_demand", "company_docs_about_issue", "support_info_from_user", "policy_refs"]
        }),
    )
}

/// Report assembled from the raw inputs when extraction fails
pub fn fallback_report(messages: &[Message], docs: &[KnowledgeDocument]) -> Report {
    let issue = match last_user_text(messages) {
        "" => "Issue not specified".to_string(),
        text => text.to_string(),
    };

    let company_docs_about_issue = if docs.is_empty() {
        "No company documents available".to_string()
    } else {
        docs.iter()
            .enumerate()
            .map(|(i, doc)| {
                let excerpt: String = doc.content.chars().take(DOC_EXCERPT_CHARS).collect();
                format!("{}. {}...", i + 1, excerpt)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    Report {
        issue,
        user_demand: "As mentioned in the issue above".to_string(),
        company_docs_about_issue,
        support_info_from_user: "As mentioned in the issue above".to_string(),
        policy_refs: "Not specified".to_string(),
    }
}

fn report_context(messages: &[Message], docs: &[KnowledgeDocument]) -> String {
    let mut parts = vec!["=== User Messages ===".to_string()];
    parts.extend(user_turns(messages).map(|m| format!("User: {}", m.content)));

    if docs.is_empty() {
        parts.push("\n=== Company Documents ===".to_string());
        parts.push(NO_DOCUMENTS.to_string());
    } else {
        parts.push("\n=== Company Documents (Knowledge Base) ===".to_string());
        parts.push(format_kb_context(docs));
    }
    parts.join("\n")
}

pub struct ReportStage {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ReportStage {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn build(&self, messages: &[Message], docs: &[KnowledgeDocument]) -> Result<Report> {
        let conversation = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(report_context(messages, docs)),
        ];
        extract_as(self.model.as_ref(), &conversation, &report_schema(), self.timeout).await
    }

    pub async fn run(&self, state: &WorkflowState) -> StateUpdate {
        let report = match self.build(&state.messages, &state.kb_docs).await {
            Ok(report) => {
                info!(policy_refs = %report.policy_refs, "Report generated");
                report
            }
            Err(e) => {
                warn!(error = %e, "Report generation failed, using fallback report");
                fallback_report(&state.messages, &state.kb_docs)
            }
        };

        StateUpdate {
            report: Some(report),
            ..StateUpdate::default()
        }
    }
}
