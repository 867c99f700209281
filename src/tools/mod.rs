//! Tool trait and registry
//!
//! Tools are looked up by name from a per-request registry. Each one
//! takes a JSON argument object and answers with a JSON value that is fed
//! back to the verifier as a tool-result turn.

pub mod jira;

pub use jira::{InMemoryTicketService, JiraClient, TicketRequest, TicketService};

use crate::error::OrchestrationError;
use crate::llm::ToolSpec;
use crate::models::{QueryContext, Sentiment, TicketType, Urgency};
use crate::retrieval::{AccessFilter, RetrievalRequest, Retriever};
use crate::scoring::NEUTRAL_SEMANTIC;
use crate::store::AccountStore;
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the argument object
    fn parameters(&self) -> Value;
    async fn execute(&self, args: &Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Declarations advertised to the model, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_object(args: &Value) -> Result<()> {
    if args.is_object() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidToolInput(
            "tool arguments must be a JSON object".to_string(),
        ))
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    optional_str(args, key)
        .ok_or_else(|| OrchestrationError::InvalidToolInput(format!("Expected '{}'", key)))
}

//
// ================= Knowledge search =================
//

/// Knowledge-base search scoped to the caller's tenant and role
pub struct RetrieverTool {
    retriever: Arc<dyn Retriever>,
    filter: AccessFilter,
    k: usize,
}

impl RetrieverTool {
    pub fn new(retriever: Arc<dyn Retriever>, filter: AccessFilter, k: usize) -> Self {
        Self { retriever, filter, k }
    }
}

#[async_trait::async_trait]
impl Tool for RetrieverTool {
    fn name(&self) -> &'static str {
        "retriever_tool"
    }

    fn description(&self) -> &'static str {
        "Searches the organization's knowledge base for company policies, documents and procedures relevant to claims, complaints or service requests."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let query = require_str(args, "query")?;
        let request = RetrievalRequest::new(query, self.filter.clone(), self.k);

        let batch = match self.retriever.retrieve_with_scores(&request).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Retriever tool failed");
                return Ok(Value::String(format!("Error retrieving documents: {}", e)));
            }
        };

        if batch.is_empty() {
            return Ok(Value::String(
                "I found no relevant information in the knowledge base.".to_string(),
            ));
        }

        let formatted: Vec<String> = batch
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let score = batch
                    .scores
                    .as_ref()
                    .and_then(|s| s.get(i).copied())
                    .unwrap_or(NEUTRAL_SEMANTIC);
                format!("Document {} (relevance: {:.2}):\n{}", i + 1, score, doc.content)
            })
            .collect();

        Ok(Value::String(formatted.join("\n\n")))
    }
}

//
// ================= Ticketing =================
//

pub struct CreateTicketTool {
    tickets: Arc<dyn TicketService>,
}

impl CreateTicketTool {
    pub fn new(tickets: Arc<dyn TicketService>) -> Self {
        Self { tickets }
    }

    fn request(args: &Value) -> Result<TicketRequest> {
        ensure_object(args)?;

        let issue_type = require_str(args, "issue_type")?;
        let issue_type = TicketType::from_literal(issue_type).ok_or_else(|| {
            OrchestrationError::InvalidToolInput(format!(
                "issue_type must be one of complaint, service_request, feature_request (got '{}')",
                issue_type
            ))
        })?;

        let urgency = optional_str(args, "urgency")
            .and_then(|u| serde_json::from_value(json!(u.to_lowercase())).ok())
            .unwrap_or(Urgency::Medium);
        let sentiment = optional_str(args, "sentiment")
            .and_then(|s| serde_json::from_value(json!(s.to_lowercase())).ok())
            .unwrap_or(Sentiment::Neutral);

        let summary: String = require_str(args, "summary")?.chars().take(100).collect();

        Ok(TicketRequest {
            summary,
            description: require_str(args, "description")?.to_string(),
            issue_type,
            urgency,
            sentiment,
        })
    }
}

#[async_trait::async_trait]
impl Tool for CreateTicketTool {
    fn name(&self) -> &'static str {
        "create_jira_ticket"
    }

    fn description(&self) -> &'static str {
        "Creates a JIRA ticket for service requests, complaints and feature requests. Returns the ticket key."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "Short subject of the ticket (max 100 chars)"},
                "description": {"type": "string", "description": "Everything needed to resolve the issue"},
                "issue_type": {"type": "string", "enum": ["complaint", "service_request", "feature_request"]},
                "urgency": {"type": "string", "enum": ["high", "medium", "low"]},
                "sentiment": {"type": "string", "enum": ["positive", "neutral", "negative"]}
            },
            "required": ["summary", "description", "issue_type"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let request = Self::request(args)?;

        let text = match self.tickets.create_ticket(&request).await {
            Ok(key) => format!("Successfully created JIRA ticket: {}", key),
            Err(e) => {
                error!(error = %e, "Ticket creation failed");
                format!("Failed to create JIRA ticket: {}", e)
            }
        };
        Ok(Value::String(text))
    }
}

//
// ================= Account lookups =================
//

pub struct GetUserDataTool {
    accounts: Arc<dyn AccountStore>,
}

impl GetUserDataTool {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

#[async_trait::async_trait]
impl Tool for GetUserDataTool {
    fn name(&self) -> &'static str {
        "get_user_data"
    }

    fn description(&self) -> &'static str {
        "Retrieve a user's account record by user_id or email. Returns an empty object if no user is found."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": {"type": "string"},
                "email": {"type": "string"}
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        ensure_object(args)?;

        let user = match (optional_str(args, "user_id"), optional_str(args, "email")) {
            (Some(user_id), _) => self.accounts.find_user_by_id(user_id).await?,
            (None, Some(email)) => self.accounts.find_user_by_email(email).await?,
            (None, None) => return Ok(json!({"error": "Must provide either user_id or email"})),
        };

        match user {
            Some(user) => Ok(serde_json::to_value(user)?),
            None => Ok(json!({})),
        }
    }
}

pub struct ListUserPoliciesTool {
    accounts: Arc<dyn AccountStore>,
}

impl ListUserPoliciesTool {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

#[async_trait::async_trait]
impl Tool for ListUserPoliciesTool {
    fn name(&self) -> &'static str {
        "list_user_policies"
    }

    fn description(&self) -> &'static str {
        "List all policies held by a user, including dates, billing and last payment."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": {"type": "string"}
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let user_id = require_str(args, "user_id")?;
        let policies = self.accounts.list_policies(user_id).await?;
        Ok(serde_json::to_value(policies)?)
    }
}

/// Shared collaborators the per-request tools are built from
#[derive(Clone)]
pub struct ToolServices {
    pub retriever: Arc<dyn Retriever>,
    pub accounts: Arc<dyn AccountStore>,
    pub tickets: Arc<dyn TicketService>,
    /// Documents returned by the knowledge search tool
    pub retrieval_k: usize,
}

/// Registry for one request, with knowledge search scoped to its tenant and role
pub fn create_default_registry(ctx: &QueryContext, services: &ToolServices) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(RetrieverTool::new(
        Arc::clone(&services.retriever),
        AccessFilter::from(ctx),
        services.retrieval_k,
    )));
    registry.register(Arc::new(CreateTicketTool::new(Arc::clone(&services.tickets))));
    registry.register(Arc::new(GetUserDataTool::new(Arc::clone(&services.accounts))));
    registry.register(Arc::new(ListUserPoliciesTool::new(Arc::clone(&services.accounts))));

    info!(tools = ?registry.list(), tenant_id = %ctx.tenant_id, "Tool registry built");
    registry
}
