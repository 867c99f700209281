//! Grounded answers for plain queries

use super::format_kb_context;
use crate::error::{with_timeout, OrchestrationError};
use crate::llm::LanguageModel;
use crate::messages::Message;
use crate::models::KnowledgeDocument;
use crate::state::{StateUpdate, WorkflowState};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const NO_DOCS_FALLBACK: &str = "I couldn't find relevant information in my knowledge base to answer your question. Would you like me to create a ticket so our team can assist you further?";
const DOCS_FALLBACK: &str = "I found some relevant information in my knowledge base, but I'm having trouble processing it right now. Would you like me to create a ticket for further assistance?";

fn system_prompt(kb_context: &str) -> String {
    format!(
        r#"You are a helpful BFSI (Banking, Financial Services, Insurance) customer support assistant.

Answer the user's question using only the knowledge base documents below. Cite the source document when you rely on it. If the documents do not contain the answer, say so plainly and offer to create a support ticket. Never invent policy terms, fees or timelines.

{}"#,
        kb_context
    )
}

/// Answer used when generation fails or comes back empty
pub fn fallback_answer(docs: &[KnowledgeDocument]) -> &'static str {
    if docs.is_empty() {
        NO_DOCS_FALLBACK
    } else {
        DOCS_FALLBACK
    }
}

pub struct AnswerStage {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl AnswerStage {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn answer(&self, messages: &[Message], docs: &[KnowledgeDocument]) -> Result<String> {
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(Message::system(system_prompt(&format_kb_context(docs))));
        conversation.extend_from_slice(messages);

        let text = with_timeout(self.timeout, "answer generation", self.model.generate(&conversation)).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(OrchestrationError::LlmError("empty answer".to_string()));
        }
        Ok(text.to_string())
    }

    pub async fn run(&self, state: &WorkflowState) -> StateUpdate {
        let answer = match self.answer(&state.messages, &state.kb_docs).await {
            Ok(answer) => {
                info!(documents = state.kb_docs.len(), "Answer generated");
                answer
            }
            Err(e) => {
                warn!(error = %e, "Answer generation failed, using fallback");
                fallback_answer(&state.kb_docs).to_string()
            }
        };

        StateUpdate {
            final_answer: Some(answer.clone()),
            ..StateUpdate::default()
        }
        .with_message(Message::assistant(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;
    use crate::models::QueryContext;
    use crate::testing::ScriptedModel;
    use serde_json::Map;

    fn state_with_docs(docs: Vec<KnowledgeDocument>) -> WorkflowState {
        let mut state = WorkflowState::new(QueryContext::new("What is the refund window?", "acme", "customer"));
        state.merge(StateUpdate {
            kb_docs: Some(docs),
            ..StateUpdate::default()
        });
        state
    }

    fn doc() -> KnowledgeDocument {
        KnowledgeDocument {
            content: "Refunds are processed within 14 days.".into(),
            score: 0.82,
            source: "refund_policy.pdf".into(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_answer_appended_to_log() {
        let model = ScriptedModel::new().with_text("  Refunds take up to 14 days (refund_policy.pdf).  ");
        let stage = AnswerStage::new(Arc::new(model), Duration::from_secs(5));

        let update = stage.run(&state_with_docs(vec![doc()])).await;

        assert_eq!(
            update.final_answer.as_deref(),
            Some("Refunds take up to 14 days (refund_policy.pdf).")
        );
        assert_eq!(update.messages.len(), 1);
        assert_eq!(update.messages[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_empty_generation_uses_fallback() {
        let model = ScriptedModel::new().with_text("   ");
        let stage = AnswerStage::new(Arc::new(model), Duration::from_secs(5));

        let update = stage.run(&state_with_docs(vec![doc()])).await;
        assert_eq!(update.final_answer.as_deref(), Some(DOCS_FALLBACK));
    }

    #[tokio::test]
    async fn test_failed_generation_without_docs() {
        let stage = AnswerStage::new(Arc::new(ScriptedModel::new()), Duration::from_secs(5));

        let update = stage.run(&state_with_docs(vec![])).await;
        assert_eq!(update.final_answer.as_deref(), Some(NO_DOCS_FALLBACK));
    }
}
