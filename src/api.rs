//! REST API for the claim orchestrator
//!
//! Exposes the workflow and its audit trail over HTTP. Every response
//! uses the `ApiResponse` envelope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::graph::{Node, Orchestrator, WorkflowOutcome};
use crate::models::{IntentResult, KnowledgeDocument, QueryContext, VerificationDecision};

const DEFAULT_TENANT: &str = "default";
const DEFAULT_ROLE: &str = "customer";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub tenant_id: Option<String>,
    pub user_role: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl QueryRequest {
    fn into_context(self) -> QueryContext {
        let tenant_id = non_blank(self.tenant_id).unwrap_or_else(|| DEFAULT_TENANT.to_string());
        let user_role = non_blank(self.user_role).unwrap_or_else(|| DEFAULT_ROLE.to_string());
        QueryContext::new(self.query, tenant_id, user_role)
            .with_user(non_blank(self.user_id), non_blank(self.email))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Run summary returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub route: Vec<Node>,
    pub intent: Option<IntentResult>,
    pub verification: Option<VerificationDecision>,
    pub documents: Vec<KnowledgeDocument>,
    pub tool_rounds: u32,
    pub audit_id: Uuid,
    pub incident_id: Option<Uuid>,
}

impl From<WorkflowOutcome> for QueryResponse {
    fn from(outcome: WorkflowOutcome) -> Self {
        Self {
            answer: outcome.final_answer,
            route: outcome.route,
            intent: outcome.intent,
            verification: outcome.verification,
            documents: outcome.documents,
            tool_rounds: outcome.tool_rounds,
            audit_id: outcome.audit_id,
            incident_id: outcome.incident_id,
        }
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn run_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Query must not be empty")),
        );
    }

    let ctx = req.into_context();
    info!(tenant_id = %ctx.tenant_id, user_role = %ctx.user_role, "Received query");

    match state.orchestrator.run(ctx).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(QueryResponse::from(outcome))),
        ),
        Err(e) => {
            error!(error = %e, "Workflow failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "We could not process your request right now. Please try again later.",
                )),
            )
        }
    }
}

async fn get_audit_record(
    State(state): State<ApiState>,
    Path(audit_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.audit_log().get(audit_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("No audit record {}", audit_id))),
        ),
        Err(e) => {
            error!(error = %e, %audit_id, "Audit lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Audit lookup failed")),
            )
        }
    }
}

async fn list_tenant_audits(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.audit_log().list_for_tenant(&tenant_id).await {
        Ok(audit_ids) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "tenant_id": tenant_id,
                "audit_ids": audit_ids,
            }))),
        ),
        Err(e) => {
            error!(error = %e, tenant_id = %tenant_id, "Audit listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Audit listing failed")),
            )
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(run_query))
        .route("/api/audit/:audit_id", get(get_audit_record))
        .route("/api/tenants/:tenant_id/audit", get(list_tenant_audits))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    bind_addr: &str,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    info!(address = %bind_addr, "API server listening");
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::intent::INTENT_SCHEMA;
    use crate::config::AppConfig;
    use crate::store::InMemoryAccountStore;
    use crate::testing::{sample_knowledge_base, RecordingRetriever, ScriptedModel};
    use crate::tools::InMemoryTicketService;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::json;
    use tower::ServiceExt;

    fn router(model: ScriptedModel) -> Router {
        let orchestrator = Orchestrator::new(
            &AppConfig::default(),
            Arc::new(model),
            Arc::new(RecordingRetriever::new(sample_knowledge_base())),
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryTicketService::default()),
        );
        create_router(Arc::new(orchestrator))
    }

    fn post_query(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_envelope(response: axum::response::Response) -> ApiResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(ScriptedModel::new())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_returns_answer() {
        let model = ScriptedModel::new()
            .with_extraction(
                INTENT_SCHEMA,
                json!({
                    "intent": "query",
                    "urgency": "low",
                    "sentiment": "neutral",
                    "aspects": ["refund policy"],
                    "out_of_scope": false
                }),
            )
            .with_text("Refunds are processed within 14 days.");

        let response = router(model)
            .oneshot(post_query(json!({"query": "What is the refund policy?", "tenant_id": "acme"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = read_envelope(response).await;
        assert!(envelope.success);
        let data: QueryResponse = serde_json::from_value(envelope.data.unwrap()).unwrap();
        assert_eq!(data.answer, "Refunds are processed within 14 days.");
        assert_eq!(data.route, vec![Node::Intent, Node::Answer, Node::End]);
    }

    #[tokio::test]
    async fn test_tenant_audit_listing() {
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
        let app = router(model);

        let response = app
            .clone()
            .oneshot(post_query(json!({"query": "Can I rent a sofa?", "tenant_id": "acme"})))
            .await
            .unwrap();
        let data: QueryResponse = serde_json::from_value(read_envelope(response).await.data.unwrap()).unwrap();

        let listing = |tenant: &str| {
            Request::builder()
                .uri(format!("/api/tenants/{}/audit", tenant))
                .body(Body::empty())
                .unwrap()
        };

        let acme = read_envelope(app.clone().oneshot(listing("acme")).await.unwrap()).await;
        assert_eq!(acme.data.unwrap()["audit_ids"], json!([data.audit_id]));

        let globex = read_envelope(app.oneshot(listing("globex")).await.unwrap()).await;
        assert_eq!(globex.data.unwrap()["audit_ids"], json!([]));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let response = router(ScriptedModel::new())
            .oneshot(post_query(json!({"query": "   "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!read_envelope(response).await.success);
    }

    #[tokio::test]
    async fn test_unknown_audit_record() {
        let response = router(ScriptedModel::new())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/audit/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_request_defaults() {
        let ctx = QueryRequest {
            query: "refund".into(),
            tenant_id: None,
            user_role: Some(" ".into()),
            user_id: Some("U001".into()),
            email: None,
        }
        .into_context();

        assert_eq!(ctx.tenant_id, DEFAULT_TENANT);
        assert_eq!(ctx.user_role, DEFAULT_ROLE);
        assert_eq!(ctx.user_id.as_deref(), Some("U001"));
    }
}
