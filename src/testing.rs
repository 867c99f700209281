//! Scripted collaborators for unit tests

use crate::error::OrchestrationError;
use crate::llm::{LanguageModel, OutputSchema, ToolSpec};
use crate::messages::Message;
use crate::models::RetrievedDocument;
use crate::retrieval::{RetrievalBatch, RetrievalRequest, Retriever};
use crate::Result;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Language model replaying queued responses. An exhausted queue
/// behaves like a failing model call.
#[derive(Default)]
pub struct ScriptedModel {
    texts: Mutex<VecDeque<Result<String>>>,
    tool_turns: Mutex<VecDeque<Result<Message>>>,
    extractions: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, text: &str) -> Self {
        self.texts.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn with_tool_turn(self, message: Message) -> Self {
        self.tool_turns.lock().unwrap().push_back(Ok(message));
        self
    }

    pub fn with_extraction(self, schema: &str, value: Value) -> Self {
        self.extractions
            .lock()
            .unwrap()
            .entry(schema.to_string())
            .or_default()
            .push_back(Ok(value));
        self
    }

    pub fn with_extraction_error(self, schema: &str) -> Self {
        self.extractions
            .lock()
            .unwrap()
            .entry(schema.to_string())
            .or_default()
            .push_back(Err(OrchestrationError::LlmError("scripted failure".to_string())));
        self
    }

    /// Method (or schema) names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn exhausted<T>(what: &str) -> Result<T> {
        Err(OrchestrationError::LlmError(format!("no scripted response for {}", what)))
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _messages: &[Message]) -> Result<String> {
        self.record("generate");
        let next = self.texts.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Self::exhausted("generate"))
    }

    async fn generate_with_tools(&self, _messages: &[Message], _tools: &[ToolSpec]) -> Result<Message> {
        self.record("generate_with_tools");
        let next = self.tool_turns.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Self::exhausted("generate_with_tools"))
    }

    async fn extract(&self, _messages: &[Message], schema: &OutputSchema) -> Result<Value> {
        self.record(schema.name);
        let next = self
            .extractions
            .lock()
            .unwrap()
            .get_mut(schema.name)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Self::exhausted(schema.name))
    }
}

/// Retriever that records every request it receives
#[derive(Default)]
pub struct RecordingRetriever {
    documents: Vec<RetrievedDocument>,
    requests: Mutex<Vec<RetrievalRequest>>,
    fail_queries_containing: Option<String>,
    fail_scored_path: bool,
}

impl RecordingRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    /// Fail both paths for queries containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_queries_containing = Some(needle.to_string());
        self
    }

    /// Fail only the scored path
    pub fn without_scores(mut self) -> Self {
        self.fail_scored_path = true;
        self
    }

    pub fn requests(&self) -> Vec<RetrievalRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn check(&self, request: &RetrievalRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.fail_queries_containing {
            Some(needle) if request.query.contains(needle.as_str()) => Err(
                OrchestrationError::RetrievalError(format!("scripted failure for '{}'", request.query)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Retriever for RecordingRetriever {
    async fn retrieve_with_scores(&self, request: &RetrievalRequest) -> Result<RetrievalBatch> {
        self.check(request)?;
        if self.fail_scored_path {
            return Err(OrchestrationError::RetrievalError("scores unavailable".to_string()));
        }

        let documents: Vec<RetrievedDocument> = self.documents.iter().take(request.k).cloned().collect();
        let scores = (0..documents.len()).map(|i| 0.9 - 0.1 * i as f64).collect();
        Ok(RetrievalBatch::scored(documents, scores))
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedDocument>> {
        self.check(request)?;
        Ok(self.documents.iter().take(request.k).cloned().collect())
    }
}

/// Knowledge-base chunk visible to every role of tenant `acme`
pub fn kb_chunk(content: &str, source: &str, chunk_index: i64) -> RetrievedDocument {
    let metadata = json!({
        "tenant_id": "acme",
        "document_visibility": "Public",
        "source": source,
        "chunk_index": chunk_index,
        "document_type": "formatted_document",
        "word_count": 120
    });
    RetrievedDocument::new(content, metadata.as_object().cloned().unwrap_or_default())
}

pub fn sample_knowledge_base() -> Vec<RetrievedDocument> {
    vec![
        kb_chunk(
            "Refunds for cancelled insurance policies are issued within 14 days of the cancellation request.",
            "kb/refund_policy.pdf",
            0,
        ),
        kb_chunk(
            "A cancellation fee of 5% applies to annual plans cancelled after the 30 day free-look period.",
            "kb/fees.pdf",
            2,
        ),
        kb_chunk(
            "Payment policies: premiums are billed monthly and can be paid by card or direct debit.",
            "kb/payments.pdf",
            1,
        ),
    ]
}
