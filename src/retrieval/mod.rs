//! Knowledge retrieval
//!
//! The vector store is an external collaborator reached through
//! [`Retriever`]. Every request carries an [`AccessFilter`] so tenant
//! isolation and role-based visibility are enforced by the backend.

pub mod http;
pub mod memory;
pub mod strategy;

pub use http::HttpRetriever;
pub use memory::InMemoryRetriever;
pub use strategy::{PlannedCall, RetrievalStrategy};

use crate::models::{QueryContext, RetrievedDocument};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Similarity,
    /// Maximal marginal relevance. Yields neutral scores.
    Mmr,
}

/// Tenant + role visibility predicate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessFilter {
    pub tenant_id: String,
    pub user_role: String,
}

impl AccessFilter {
    pub fn new(tenant_id: impl Into<String>, user_role: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_role: user_role.into(),
        }
    }

    pub fn role_field(&self) -> String {
        format!("access_role_{}", self.user_role)
    }

    /// Same tenant AND (role flag set OR publicly visible)
    pub fn permits(&self, metadata: &Map<String, Value>) -> bool {
        let same_tenant = metadata
            .get("tenant_id")
            .and_then(Value::as_str)
            .map_or(false, |t| t == self.tenant_id);

        let role_allowed = metadata
            .get(&self.role_field())
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let public = metadata
            .get("document_visibility")
            .and_then(Value::as_str)
            .map_or(false, |v| v == "Public");

        same_tenant && (role_allowed || public)
    }

    /// The predicate as a `$and` / `$or` metadata filter document
    pub fn to_json(&self) -> Value {
        let mut role_clause = Map::new();
        role_clause.insert(self.role_field(), Value::Bool(true));

        json!({
            "$and": [
                { "tenant_id": self.tenant_id },
                { "$or": [
                    Value::Object(role_clause),
                    { "document_visibility": "Public" }
                ]}
            ]
        })
    }
}

impl From<&QueryContext> for AccessFilter {
    fn from(ctx: &QueryContext) -> Self {
        Self::new(ctx.tenant_id.clone(), ctx.user_role.clone())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub filter: AccessFilter,
    pub k: usize,
    pub search_type: SearchType,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, filter: AccessFilter, k: usize) -> Self {
        Self {
            query: query.into(),
            filter,
            k,
            search_type: SearchType::Similarity,
        }
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }
}

/// Documents from one retrieval call. `scores`, when present, is
/// index-aligned with `documents`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalBatch {
    pub documents: Vec<RetrievedDocument>,
    pub scores: Option<Vec<f64>>,
}

impl RetrievalBatch {
    pub fn scored(documents: Vec<RetrievedDocument>, scores: Vec<f64>) -> Self {
        Self {
            documents,
            scores: Some(scores),
        }
    }

    pub fn unscored(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            scores: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Vector-store collaborator
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Ranked documents with relevance scores in roughly [0, 1]
    async fn retrieve_with_scores(&self, request: &RetrievalRequest) -> Result<RetrievalBatch>;

    /// Plain retrieval, used as the fallback path when scoring fails
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedDocument>>;
}
