//! Intent classification and knowledge gathering

use crate::llm::{extract_as, LanguageModel, OutputSchema};
use crate::messages::{last_user_text, Message};
use crate::models::{Intent, IntentResult, Sentiment, Urgency};
use crate::retrieval::RetrievalStrategy;
use crate::state::{StateUpdate, WorkflowState};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const INTENT_SCHEMA: &str = "intent_result";

const SYSTEM_PROMPT: &str = r#"You are an intent analysis expert for the BFSI (Banking, Financial Services, Insurance) domain.

Classify the user's intent, urgency and sentiment, and break the query into self-contained search aspects for the knowledge base.

1. intent: query (information or clarification), complaint (dissatisfaction or a reported issue), service_request (a specific action such as a refund or policy change), feature_request (a suggested improvement).
2. aspects: one aspect for a single-topic query; otherwise distinct searchable sub-topics, e.g. "What are payment policies and cancellation fees?" -> ["payment policies", "cancellation fees"].
3. urgency: high for explicit urgency (urgent, critical, emergency, ASAP), medium for complaints and service requests, low otherwise.
4. sentiment: positive, neutral (default) or negative.
5. out_of_scope: true when the query is not clearly about banking, loans, cards, insurance, claims, investments or other financial products."#;

pub fn intent_schema() -> OutputSchema {
    OutputSchema::new(
        INTENT_SCHEMA,
        json!({
            "type": "OBJECT",
            "properties": {
                "intent": {"type": "STRING", "enum": ["query", "complaint", "service_request", "feature_request"]},
                "urgency": {"type": "STRING", "enum": ["high", "medium", "low"]},
                "sentiment": {"type": "STRING", "enum": ["positive", "neutral", "negative"]},
                "aspects": {"type": "ARRAY", "items": {"type": "STRING"}},
                "out_of_scope": {"type": "BOOLEAN"}
            },
            "required": ["intent", "urgency", "sentiment", "aspects", "out_of_scope"]
        }),
    )
}

/// Intent used when classification fails
pub fn fallback_intent(query: &str) -> IntentResult {
    IntentResult {
        intent: Intent::Query,
        urgency: Urgency::Medium,
        sentiment: Sentiment::Neutral,
        aspects: vec![query.to_string()],
        out_of_scope: false,
    }
}

pub struct IntentStage {
    model: Arc<dyn LanguageModel>,
    strategy: RetrievalStrategy,
    timeout: Duration,
}

impl IntentStage {
    pub fn new(model: Arc<dyn LanguageModel>, strategy: RetrievalStrategy, timeout: Duration) -> Self {
        Self {
            model,
            strategy,
            timeout,
        }
    }

    pub async fn analyze(&self, messages: &[Message]) -> Result<IntentResult> {
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(Message::system(SYSTEM_PROMPT));
        conversation.extend_from_slice(messages);

        extract_as(self.model.as_ref(), &conversation, &intent_schema(), self.timeout).await
    }

    pub async fn run(&self, state: &WorkflowState) -> StateUpdate {
        let query = match last_user_text(&state.messages) {
            "" => state.context.query.as_str(),
            text => text,
        };

        let mut intent = match self.analyze(&state.messages).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "Intent analysis failed, using default intent");
                fallback_intent(query)
            }
        };

        intent.aspects.retain(|a| !a.trim().is_empty());
        if intent.aspects.is_empty() {
            intent.aspects = vec![query.to_string()];
        }

        info!(
            intent = %intent.intent,
            urgency = intent.urgency.as_str(),
            sentiment = intent.sentiment.as_str(),
            aspects = intent.aspects.len(),
            out_of_scope = intent.out_of_scope,
            "Intent analysed"
        );

        let kb_docs = if intent.out_of_scope {
            info!("Query is out of scope, skipping retrieval");
            Vec::new()
        } else {
            self.strategy.gather(&state.context, &intent.aspects).await
        };

        StateUpdate {
            intent_result: Some(intent),
            kb_docs: Some(kb_docs),
            ..StateUpdate::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryContext;
    use crate::scoring::ScoringEngine;
    use crate::testing::{sample_knowledge_base, RecordingRetriever, ScriptedModel};

    fn stage(model: ScriptedModel, retriever: Arc<RecordingRetriever>) -> IntentStage {
        let strategy = RetrievalStrategy::new(retriever, ScoringEngine::default(), 6);
        IntentStage::new(Arc::new(model), strategy, Duration::from_secs(5))
    }

    fn state(query: &str) -> WorkflowState {
        WorkflowState::new(QueryContext::new(query, "acme", "customer"))
    }

    #[tokio::test]
    async fn test_classification_triggers_retrieval() {
        let model = ScriptedModel::new().with_extraction(
            INTENT_SCHEMA,
            json!({
                "intent": "complaint",
                "urgency": "high",
                "sentiment": "negative",
                "aspects": ["refund timeline", "cancellation fees"],
                "out_of_scope": false
            }),
        );
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()));

        let update = stage(model, retriever.clone())
            .run(&state("My refund is late and I was charged a fee"))
            .await;

        let intent = update.intent_result.unwrap();
        assert_eq!(intent.intent, Intent::Complaint);
        assert_eq!(retriever.requests().len(), 2);
        assert!(update.kb_docs.is_some());
    }

    #[tokio::test]
    async fn test_out_of_scope_skips_retrieval() {
        let model = ScriptedModel::new().with_extraction(
            INTENT_SCHEMA,
            json!({
                "intent": "query",
                "urgency": "low",
                "sentiment": "neutral",
                "aspects": ["sofa rental"],
                "out_of_scope": true
            }),
        );
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()));

        let update = stage(model, retriever.clone()).run(&state("Can I rent a sofa?")).await;

        assert!(update.intent_result.unwrap().out_of_scope);
        assert_eq!(update.kb_docs, Some(vec![]));
        assert!(retriever.requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_aspects_replaced_with_query() {
        let model = ScriptedModel::new().with_extraction(
            INTENT_SCHEMA,
            json!({
                "intent": "query",
                "urgency": "low",
                "sentiment": "neutral",
                "aspects": [],
                "out_of_scope": false
            }),
        );
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()));

        let update = stage(model, retriever.clone()).run(&state("What is the refund policy?")).await;

        assert_eq!(update.intent_result.unwrap().aspects, vec!["What is the refund policy?".to_string()]);
        assert_eq!(retriever.requests()[0].query, "What is the refund policy?");
    }

    #[tokio::test]
    async fn test_failed_classification_uses_default() {
        let model = ScriptedModel::new().with_extraction_error(INTENT_SCHEMA);
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()));

        let update = stage(model, retriever).run(&state("refund policy")).await;

        assert_eq!(update.intent_result, Some(fallback_intent("refund policy")));
    }
}
