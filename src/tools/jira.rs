//! Ticketing collaborator
//!
//! Tickets are filed as Jira stories labelled with the issue type,
//! urgency and sentiment.

use crate::config::JiraConfig;
use crate::error::OrchestrationError;
use crate::models::{Sentiment, TicketType, Urgency};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TicketRequest {
    pub summary: String,
    pub description: String,
    pub issue_type: TicketType,
    pub urgency: Urgency,
    pub sentiment: Sentiment,
}

impl TicketRequest {
    pub fn labels(&self) -> [&'static str; 3] {
        [
            self.issue_type.as_str(),
            self.urgency.as_str(),
            self.sentiment.as_str(),
        ]
    }
}

#[async_trait::async_trait]
pub trait TicketService: Send + Sync {
    /// File a ticket and return its key
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String>;
}

pub struct JiraClient {
    client: Client,
    base_url: String,
    email: String,
    api_token: String,
    project_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

impl JiraClient {
    pub fn new(config: &JiraConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            project_key: config.project_key.clone(),
        })
    }

    fn issue_body(&self, ticket: &TicketRequest) -> Value {
        json!({
            "fields": {
                "project": { "key": self.project_key },
                "summary": ticket.summary,
                "description": ticket.description,
                "issuetype": { "name": "Story" },
                "labels": ticket.labels(),
            }
        })
    }
}

#[async_trait::async_trait]
impl TicketService for JiraClient {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String> {
        let url = format!("{}/rest/api/2/issue", self.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&self.issue_body(ticket))
            .send()
            .await
            .map_err(|e| OrchestrationError::ToolError(format!("Jira request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::ToolError(format!(
                "Jira returned {}: {}",
                status, body
            )));
        }

        let created: CreatedIssue = response
            .json()
            .await
            .map_err(|e| OrchestrationError::ToolError(format!("Invalid Jira response: {}", e)))?;

        info!(key = %created.key, issue_type = %ticket.issue_type, "Jira ticket created");
        Ok(created.key)
    }
}

/// Keeps tickets in memory with sequential keys
pub struct InMemoryTicketService {
    project_key: String,
    tickets: RwLock<Vec<(String, TicketRequest)>>,
}

impl InMemoryTicketService {
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            tickets: RwLock::new(Vec::new()),
        }
    }

    pub async fn tickets(&self) -> Vec<(String, TicketRequest)> {
        self.tickets.read().await.clone()
    }
}

impl Default for InMemoryTicketService {
    fn default() -> Self {
        Self::new("SUP")
    }
}

#[async_trait::async_trait]
impl TicketService for InMemoryTicketService {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String> {
        let mut tickets = self.tickets.write().await;
        let key = format!("{}-{}", self.project_key, tickets.len() + 1);
        tickets.push((key.clone(), ticket.clone()));
        info!(key = %key, "Ticket recorded in memory");
        Ok(key)
    }
}
