//! Shared workflow state
//!
//! One `WorkflowState` is owned by each run. Stages never mutate it
//! directly: they return a `StateUpdate` which the orchestrator merges.
//! The message log only grows; every other field is last-writer-wins.

use crate::messages::{Message, Role};
use crate::models::{IntentResult, KnowledgeDocument, QueryContext, Report, VerificationDecision};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub context: QueryContext,
    pub messages: Vec<Message>,
    pub intent_result: Option<IntentResult>,
    pub kb_docs: Vec<KnowledgeDocument>,
    pub report: Option<Report>,
    pub verification: Option<VerificationDecision>,
    pub final_answer: Option<String>,
    /// Completed verify → tools rounds
    pub tool_rounds: u32,
    /// Incremented on every merge
    pub version: u64,
    /// Log length when the report was last written
    report_offset: usize,
}

/// Partial output of a stage
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub intent_result: Option<IntentResult>,
    pub kb_docs: Option<Vec<KnowledgeDocument>>,
    pub report: Option<Report>,
    pub verification: Option<VerificationDecision>,
    pub final_answer: Option<String>,
    pub tool_rounds: Option<u32>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }
}

impl WorkflowState {
    /// Fresh state whose log starts with the user's query
    pub fn new(context: QueryContext) -> Self {
        let messages = vec![Message::user(context.query.clone())];
        Self {
            context,
            messages,
            intent_result: None,
            kb_docs: Vec::new(),
            report: None,
            verification: None,
            final_answer: None,
            tool_rounds: 0,
            version: 0,
            report_offset: 0,
        }
    }

    pub fn merge(&mut self, update: StateUpdate) {
        if let Some(report) = update.report {
            self.report = Some(report);
            self.report_offset = self.messages.len();
        }

        self.messages.extend(update.messages);

        if let Some(intent) = update.intent_result {
            self.intent_result = Some(intent);
        }
        if let Some(docs) = update.kb_docs {
            self.kb_docs = docs;
        }
        if let Some(decision) = update.verification {
            self.verification = Some(decision);
        }
        if let Some(answer) = update.final_answer {
            self.final_answer = Some(answer);
        }
        if let Some(rounds) = update.tool_rounds {
            self.tool_rounds = rounds;
        }

        self.version += 1;
    }

    /// Whether tool results were appended after the current report
    pub fn has_tool_results_since_report(&self) -> bool {
        self.messages
            .iter()
            .skip(self.report_offset)
            .any(|m| m.role == Role::Tool)
    }
}
