//! Workflow state machine
//!
//! intent ─┬─ out_of_scope ─────────────────────────── end
//!         ├─ answer ───────────────────────────────── end
//!         └─ report ── verify ⇄ tools (bounded) ───── end
//!
//! Routing is decided by pure predicates over the state. The run loop
//! owns the state, merges each stage's update and enforces both the
//! tool-round bound and the hard step budget.

use crate::agents::{out_of_scope_update, AnswerStage, IntentStage, ReportStage, VerifyStage};
use crate::audit::{AuditLog, WorkflowRecord};
use crate::config::{AppConfig, WorkflowConfig};
use crate::error::OrchestrationError;
use crate::execution::ToolExecutor;
use crate::llm::{GeminiClient, LanguageModel};
use crate::messages::{pending_tool_calls, Message};
use crate::models::{Intent, IntentResult, KnowledgeDocument, QueryContext, VerificationDecision};
use crate::retrieval::{HttpRetriever, InMemoryRetriever, RetrievalStrategy, Retriever};
use crate::state::{StateUpdate, WorkflowState};
use crate::store::{build_account_store, AccountStore, NewIncident};
use crate::tools::jira::{InMemoryTicketService, JiraClient, TicketService};
use crate::tools::{create_default_registry, ToolServices};
use crate::verification::DecisionValidator;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Intent,
    Answer,
    Report,
    Verify,
    Tools,
    OutOfScope,
    End,
}

pub fn route_after_intent(state: &WorkflowState) -> Node {
    match &state.intent_result {
        Some(intent) if intent.out_of_scope => Node::OutOfScope,
        Some(intent) if intent.intent != Intent::Query => Node::Report,
        _ => Node::Answer,
    }
}

/// Tools while invocations are pending and rounds remain, end otherwise
pub fn route_after_verify(state: &WorkflowState, max_tool_rounds: u32) -> Node {
    if !pending_tool_calls(&state.messages).is_empty() && state.tool_rounds < max_tool_rounds {
        Node::Tools
    } else {
        Node::End
    }
}

/// Result of one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub final_answer: String,
    pub route: Vec<Node>,
    pub intent: Option<IntentResult>,
    pub verification: Option<VerificationDecision>,
    pub documents: Vec<KnowledgeDocument>,
    pub messages: Vec<Message>,
    pub tool_rounds: u32,
    pub audit_id: Uuid,
    pub incident_id: Option<Uuid>,
}

pub struct Orchestrator {
    intent: IntentStage,
    answer: AnswerStage,
    report: ReportStage,
    verify: VerifyStage,
    services: ToolServices,
    accounts: Arc<dyn AccountStore>,
    workflow: WorkflowConfig,
    audit_log: AuditLog,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        accounts: Arc<dyn AccountStore>,
        tickets: Arc<dyn TicketService>,
    ) -> Self {
        let timeout = config.model.timeout();
        let strategy = RetrievalStrategy::from_config(Arc::clone(&retriever), config);

        Self {
            intent: IntentStage::new(Arc::clone(&model), strategy, timeout),
            answer: AnswerStage::new(Arc::clone(&model), timeout),
            report: ReportStage::new(Arc::clone(&model), timeout),
            verify: VerifyStage::new(model, DecisionValidator::new(&config.decision), timeout),
            services: ToolServices {
                retriever,
                accounts: Arc::clone(&accounts),
                tickets,
                retrieval_k: config.retrieval.k,
            },
            accounts,
            workflow: config.workflow.clone(),
            audit_log: AuditLog::new(),
        }
    }

    /// Wire the production collaborators selected by the configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(&config.model)?);

        let retriever: Arc<dyn Retriever> = match (
            &config.services.vector_store_url,
            &config.services.knowledge_base_path,
        ) {
            (Some(url), _) => Arc::new(HttpRetriever::new(
                url,
                config.retrieval.timeout(),
                config.retrieval.diversity_lambda,
            )?),
            (None, Some(path)) => Arc::new(
                InMemoryRetriever::from_json_file(path)?
                    .with_diversity_lambda(config.retrieval.diversity_lambda),
            ),
            (None, None) => {
                warn!("No knowledge base configured, retrieval will return nothing");
                Arc::new(InMemoryRetriever::new(Vec::new()))
            }
        };

        let accounts = build_account_store(config.services.database_url.as_deref());

        let tickets: Arc<dyn TicketService> = match &config.services.jira {
            Some(jira) => Arc::new(JiraClient::new(jira, config.workflow.tool_timeout())?),
            None => {
                info!("Jira not configured, tickets kept in memory");
                Arc::new(InMemoryTicketService::default())
            }
        };

        info!(model = %model.name(), "Orchestrator configured");
        Ok(Self::new(config, model, retriever, accounts, tickets))
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub async fn run(&self, ctx: QueryContext) -> Result<WorkflowOutcome> {
        let start = Instant::now();
        info!(
            tenant_id = %ctx.tenant_id,
            user_role = %ctx.user_role,
            query_len = ctx.query.len(),
            "Workflow started"
        );

        let registry = Arc::new(create_default_registry(&ctx, &self.services));
        let specs = registry.specs();
        let executor = ToolExecutor::new(registry, self.workflow.tool_timeout());

        let mut state = WorkflowState::new(ctx);
        let mut route = Vec::new();
        let mut node = Node::Intent;

        while node != Node::End {
            if route.len() >= self.workflow.max_steps {
                warn!(steps = route.len(), "Step budget exhausted");
                return Err(OrchestrationError::StepLimitExceeded(self.workflow.max_steps));
            }
            route.push(node);
            debug!(node = ?node, version = state.version, "Entering node");

            node = match node {
                Node::Intent => {
                    let update = self.intent.run(&state).await;
                    state.merge(update);
                    route_after_intent(&state)
                }
                Node::OutOfScope => {
                    state.merge(out_of_scope_update());
                    Node::End
                }
                Node::Answer => {
                    let update = self.answer.run(&state).await;
                    state.merge(update);
                    Node::End
                }
                Node::Report => {
                    let update = self.report.run(&state).await;
                    state.merge(update);
                    Node::Verify
                }
                Node::Verify => {
                    let update = self.verify.run(&state, &specs).await;
                    state.merge(update);
                    let next = route_after_verify(&state, self.workflow.max_tool_rounds);
                    if next == Node::End && !pending_tool_calls(&state.messages).is_empty() {
                        warn!(
                            tool_rounds = state.tool_rounds,
                            "Tool round limit reached with calls pending"
                        );
                        let decision = self.verify.validator().fallback(state.intent_result.as_ref());
                        state.merge(StateUpdate {
                            final_answer: Some(decision.resolution.clone()),
                            verification: Some(decision),
                            ..StateUpdate::default()
                        });
                    }
                    next
                }
                Node::Tools => {
                    let results = executor.execute_pending(&state.messages).await;
                    state.merge(StateUpdate {
                        messages: results,
                        tool_rounds: Some(state.tool_rounds + 1),
                        ..StateUpdate::default()
                    });
                    Node::Verify
                }
                Node::End => Node::End,
            };
        }
        route.push(Node::End);

        let incident_id = self.record_incident(&state).await;

        let mut record = WorkflowRecord::new(state.context.clone(), route.clone());
        record.intent = state.intent_result.clone();
        record.decision = state.verification.clone();
        record.final_answer = state.final_answer.clone();
        record.tool_rounds = state.tool_rounds;
        record.incident_id = incident_id;
        let audit_id = self.audit_log.record(record).await?;

        info!(
            route = ?route,
            tool_rounds = state.tool_rounds,
            documents = state.kb_docs.len(),
            %audit_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Workflow completed"
        );

        Ok(WorkflowOutcome {
            final_answer: state.final_answer.unwrap_or_default(),
            route,
            intent: state.intent_result,
            verification: state.verification,
            documents: state.kb_docs,
            messages: state.messages,
            tool_rounds: state.tool_rounds,
            audit_id,
            incident_id,
        })
    }

    /// Best effort: a failed write is logged and the run still succeeds
    async fn record_incident(&self, state: &WorkflowState) -> Option<Uuid> {
        let decision = state.verification.as_ref()?;
        if !decision.action_plan.make_db_entry {
            return None;
        }

        let incident = NewIncident::from_decision(
            &state.context,
            state.intent_result.as_ref(),
            state.report.as_ref(),
            decision,
        );
        match self.accounts.create_incident(incident).await {
            Ok(record) => {
                info!(incident_id = %record.incident_id, "Incident recorded");
                Some(record.incident_id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to record incident");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::intent::INTENT_SCHEMA;
    use crate::agents::report::REPORT_SCHEMA;
    use crate::agents::verify::DECISION_SCHEMA;
    use crate::agents::OUT_OF_SCOPE_MESSAGE;
    use crate::messages::{Role, ToolCall};
    use crate::models::{Sentiment, Urgency, Validity};
    use crate::store::InMemoryAccountStore;
    use crate::testing::{sample_knowledge_base, RecordingRetriever, ScriptedModel};
    use crate::verification::FALLBACK_RESOLUTION;
    use serde_json::{json, Value};

    struct Harness {
        orchestrator: Orchestrator,
        retriever: Arc<RecordingRetriever>,
        accounts: Arc<InMemoryAccountStore>,
    }

    async fn harness(config: AppConfig, model: ScriptedModel) -> Harness {
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()));
        let accounts = Arc::new(InMemoryAccountStore::with_demo_data().await);
        let orchestrator = Orchestrator::new(
            &config,
            Arc::new(model),
            retriever.clone(),
            accounts.clone(),
            Arc::new(InMemoryTicketService::default()),
        );
        Harness {
            orchestrator,
            retriever,
            accounts,
        }
    }

    fn intent_json(intent: &str, out_of_scope: bool) -> Value {
        json!({
            "intent": intent,
            "urgency": "medium",
            "sentiment": "neutral",
            "aspects": ["refund policy"],
            "out_of_scope": out_of_scope
        })
    }

    fn complaint_model() -> ScriptedModel {
        ScriptedModel::new()
            .with_extraction(INTENT_SCHEMA, intent_json("complaint", false))
            .with_extraction(
                REPORT_SCHEMA,
                json!({
                    "issue": "Charged twice for premium",
                    "user_demand": "Refund",
                    "company_docs_about_issue": "Duplicate charges are refunded",
                    "support_info_from_user": "Policy POL-7781",
                    "policy_refs": "POL-7781"
                }),
            )
            .with_tool_turn(Message::assistant_with_tools(
                "",
                vec![
                    ToolCall::new("get_user_data", json!({"user_id": "U001"})),
                    ToolCall::new("list_user_policies", json!({"user_id": "U001"})),
                ],
            ))
            .with_extraction(
                DECISION_SCHEMA,
                json!({
                    "is_valid": "Yes",
                    "resolution": "The duplicate charge will be refunded.",
                    "confidence": 0.9,
                    "policy_citations": ["refund_policy.pdf"],
                    "action_plan": {
                        "create_ticket": false,
                        "make_db_entry": true,
                        "call_refund_api": true,
                        "refund_amount": 450.0
                    }
                }),
            )
    }

    fn ctx() -> QueryContext {
        QueryContext::new("I was charged twice for my premium", "acme", "customer")
            .with_user(Some("U001".into()), None)
    }

    #[tokio::test]
    async fn test_out_of_scope_skips_retrieval() {
        let model = ScriptedModel::new().with_extraction(INTENT_SCHEMA, intent_json("query", true));
        let h = harness(AppConfig::default(), model).await;

        let outcome = h.orchestrator.run(ctx()).await.unwrap();

        assert_eq!(outcome.route, vec![Node::Intent, Node::OutOfScope, Node::End]);
        assert_eq!(outcome.final_answer, OUT_OF_SCOPE_MESSAGE);
        assert!(h.retriever.requests().is_empty());
        assert!(outcome.documents.is_empty());
        assert!(outcome.verification.is_none());
    }

    #[tokio::test]
    async fn test_query_route() {
        let model = ScriptedModel::new()
            .with_extraction(INTENT_SCHEMA, intent_json("query", false))
            .with_text("Refunds are processed within 14 days.");
        let h = harness(AppConfig::default(), model).await;

        let outcome = h.orchestrator.run(ctx()).await.unwrap();

        assert_eq!(outcome.route, vec![Node::Intent, Node::Answer, Node::End]);
        assert_eq!(outcome.final_answer, "Refunds are processed within 14 days.");
        assert_eq!(h.retriever.requests().len(), 1);
        assert!(outcome.incident_id.is_none());
        assert!(h.orchestrator.audit_log().verify_integrity(outcome.audit_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_complaint_route_with_tools() {
        let h = harness(AppConfig::default(), complaint_model()).await;

        let outcome = h.orchestrator.run(ctx()).await.unwrap();

        assert_eq!(
            outcome.route,
            vec![Node::Intent, Node::Report, Node::Verify, Node::Tools, Node::Verify, Node::End]
        );
        assert_eq!(outcome.tool_rounds, 1);

        let tool_turns: Vec<_> = outcome.messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_turns.len(), 2);
        assert!(tool_turns[0].content.contains("Asha Verma"));

        let decision = outcome.verification.unwrap();
        assert_eq!(decision.is_valid, Validity::Yes);
        assert_eq!(outcome.final_answer, "The duplicate charge will be refunded.");
        assert!(outcome.incident_id.is_some());
        assert_eq!(h.accounts.incident_count().await, 1);
        assert_eq!(h.orchestrator.audit_log().len().await, 1);
    }

    #[tokio::test]
    async fn test_tool_round_cap_installs_fallback() {
        let mut config = AppConfig::default();
        config.workflow.max_tool_rounds = 0;
        let h = harness(config, complaint_model()).await;

        let outcome = h.orchestrator.run(ctx()).await.unwrap();

        assert_eq!(outcome.route, vec![Node::Intent, Node::Report, Node::Verify, Node::End]);
        let decision = outcome.verification.unwrap();
        assert_eq!(decision.is_valid, Validity::LowConfidence);
        assert!(decision.action_plan.create_ticket);
        assert_eq!(outcome.final_answer, FALLBACK_RESOLUTION);
        assert!(outcome.incident_id.is_some());
    }

    #[tokio::test]
    async fn test_step_limit() {
        let mut config = AppConfig::default();
        config.workflow.max_steps = 2;
        let h = harness(config, complaint_model()).await;

        let result = h.orchestrator.run(ctx()).await;

        assert!(matches!(result, Err(OrchestrationError::StepLimitExceeded(2))));
        assert_eq!(h.orchestrator.audit_log().len().await, 0);
    }

    #[test]
    fn test_route_predicates() {
        let mut state = WorkflowState::new(ctx());
        assert_eq!(route_after_intent(&state), Node::Answer);

        state.merge(StateUpdate {
            intent_result: Some(IntentResult {
                intent: Intent::ServiceRequest,
                urgency: Urgency::High,
                sentiment: Sentiment::Negative,
                aspects: vec!["refund".into()],
                out_of_scope: false,
            }),
            ..StateUpdate::default()
        });
        assert_eq!(route_after_intent(&state), Node::Report);
        assert_eq!(route_after_verify(&state, 3), Node::End);

        let call = ToolCall::new("get_user_data", json!({}));
        state.merge(StateUpdate::new().with_message(Message::assistant_with_tools("", vec![call])));
        assert_eq!(route_after_verify(&state, 3), Node::Tools);

        state.merge(StateUpdate {
            tool_rounds: Some(3),
            ..StateUpdate::default()
        });
        assert_eq!(route_after_verify(&state, 3), Node::End);
    }
}
