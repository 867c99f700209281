//! Core data models for the claim workflow

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Query,
    Complaint,
    ServiceRequest,
    FeatureRequest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Ticket categories accepted by the ticketing system
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Complaint,
    ServiceRequest,
    FeatureRequest,
}

/// Verdict on a claim. Serialized as the exact literals the
/// downstream consumers expect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Validity {
    #[serde(rename = "Yes")]
    Yes,
    #[serde(rename = "Low Confidence")]
    LowConfidence,
    #[serde(rename = "No")]
    No,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "query",
            Intent::Complaint => "complaint",
            Intent::ServiceRequest => "service_request",
            Intent::FeatureRequest => "feature_request",
        }
    }

    /// Ticket category matching this intent, if the intent is ticketable
    pub fn ticket_type(&self) -> Option<TicketType> {
        match self {
            Intent::Query => None,
            Intent::Complaint => Some(TicketType::Complaint),
            Intent::ServiceRequest => Some(TicketType::ServiceRequest),
            Intent::FeatureRequest => Some(TicketType::FeatureRequest),
        }
    }
}

impl TicketType {
    pub const ALL: [TicketType; 3] = [
        TicketType::Complaint,
        TicketType::ServiceRequest,
        TicketType::FeatureRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Complaint => "complaint",
            TicketType::ServiceRequest => "service_request",
            TicketType::FeatureRequest => "feature_request",
        }
    }

    /// Strict parse: only the three literal values are accepted
    pub fn from_literal(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl Validity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Validity::Yes => "Yes",
            Validity::LowConfidence => "Low Confidence",
            Validity::No => "No",
        }
    }
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
        }
    }
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

//
// ================= Request =================
//

/// Immutable per-request context. Tenant and role scope every retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryContext {
    pub query: String,
    pub tenant_id: String,
    pub user_role: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl QueryContext {
    pub fn new(
        query: impl Into<String>,
        tenant_id: impl Into<String>,
        user_role: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            tenant_id: tenant_id.into(),
            user_role: user_role.into(),
            user_id: None,
            email: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>, email: Option<String>) -> Self {
        self.user_id = user_id;
        self.email = email;
        self
    }
}

//
// ================= Intent =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentResult {
    pub intent: Intent,
    pub urgency: Urgency,
    pub sentiment: Sentiment,
    /// Search sub-topics in generation order
    #[serde(default)]
    pub aspects: Vec<String>,
    #[serde(default)]
    pub out_of_scope: bool,
}

//
// ================= Knowledge =================
//

/// Unscored chunk as returned by a retrieval backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RetrievedDocument {
    pub fn new(content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Scored, immutable snapshot of a retrieved chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeDocument {
    pub content: String,
    pub score: f64,
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl KnowledgeDocument {
    /// File name portion of the source path
    pub fn source_name(&self) -> &str {
        self.source.rsplit('/').next().unwrap_or(&self.source)
    }
}

//
// ================= Report =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub issue: String,
    pub user_demand: String,
    pub company_docs_about_issue: String,
    pub support_info_from_user: String,
    pub policy_refs: String,
}

//
// ================= Decision =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionPlan {
    pub create_ticket: bool,
    pub ticket_type: Option<TicketType>,
    pub make_db_entry: bool,
    pub call_refund_api: bool,
    pub refund_amount: Option<f64>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationDecision {
    pub is_valid: Validity,
    pub resolution: String,
    pub confidence: f64,
    pub policy_citations: Vec<String>,
    pub action_plan: ActionPlan,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_literals() {
        let json = serde_json::to_string(&Validity::LowConfidence).unwrap();
        assert_eq!(json, "\"Low Confidence\"");

        let parsed: Validity = serde_json::from_str("\"No\"").unwrap();
        assert_eq!(parsed, Validity::No);
    }

    #[test]
    fn test_intent_result_defaults() {
        let parsed: IntentResult = serde_json::from_value(serde_json::json!({
            "intent": "service_request",
            "urgency": "high",
            "sentiment": "negative"
        }))
        .unwrap();

        assert_eq!(parsed.intent, Intent::ServiceRequest);
        assert!(parsed.aspects.is_empty());
        assert!(!parsed.out_of_scope);
    }

    #[test]
    fn test_ticket_type_mapping() {
        assert_eq!(Intent::Query.ticket_type(), None);
        assert_eq!(
            Intent::FeatureRequest.ticket_type(),
            Some(TicketType::FeatureRequest)
        );
        assert_eq!(
            TicketType::from_literal("complaint"),
            Some(TicketType::Complaint)
        );
        assert_eq!(TicketType::from_literal("Complaint - Insurance"), None);
    }

    #[test]
    fn test_source_name() {
        let doc = KnowledgeDocument {
            content: String::new(),
            score: 0.5,
            source: "kb/policies/refunds.pdf".to_string(),
            metadata: Map::new(),
        };
        assert_eq!(doc.source_name(), "refunds.pdf");
    }
}
