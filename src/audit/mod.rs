//! Audit trail
//!
//! One `WorkflowRecord` per run, keyed by audit ID. The query context is
//! hashed at record time so later reads can detect tampering.

use crate::graph::Node;
use crate::models::{IntentResult, QueryContext, VerificationDecision};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRecord {
    pub audit_id: Uuid,
    pub context: QueryContext,
    pub context_hash: String,
    /// Nodes visited, in order
    pub route: Vec<Node>,
    pub intent: Option<IntentResult>,
    pub decision: Option<VerificationDecision>,
    pub final_answer: Option<String>,
    pub tool_rounds: u32,
    pub incident_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(context: QueryContext, route: Vec<Node>) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            context_hash: compute_context_hash(&context),
            context,
            route,
            intent: None,
            decision: None,
            final_answer: None,
            tool_rounds: 0,
            incident_id: None,
            created_at: Utc::now(),
        }
    }
}

pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, WorkflowRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: WorkflowRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        self.records.write().await.insert(audit_id, record);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<WorkflowRecord>> {
        Ok(self.records.read().await.get(&audit_id).cloned())
    }

    /// Audit IDs for a tenant, oldest first
    pub async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|r| r.context.tenant_id == tenant_id)
            .map(|r| (r.audit_id, r.created_at))
            .collect();
        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the stored context still matches its hash
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;
        Ok(records
            .get(&audit_id)
            .map(|r| compute_context_hash(&r.context) == r.context_hash)
            .unwrap_or(false))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex SHA-256 of the serialized query context
pub fn compute_context_hash(context: &QueryContext) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON straight into the hasher
    if serde_json::to_writer(&mut HashWriter(&mut hasher), context).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(tenant: &str) -> QueryContext {
        QueryContext::new("Where is my refund?", tenant, "customer")
    }

    #[test]
    fn test_context_hash_is_stable() {
        let a = compute_context_hash(&context("acme"));
        assert_eq!(a.len(), 64);
        assert_eq!(a, compute_context_hash(&context("acme")));
        assert_ne!(a, compute_context_hash(&context("globex")));
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let id = log
            .record(WorkflowRecord::new(context("acme"), vec![Node::Intent, Node::Answer]))
            .await
            .unwrap();

        tokio_test::assert_ok!(log.verify_integrity(id).await);
        assert!(log.verify_integrity(id).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
        assert_eq!(log.get(id).await.unwrap().unwrap().route, vec![Node::Intent, Node::Answer]);
    }

    #[tokio::test]
    async fn test_tampered_context_fails_integrity() {
        let log = AuditLog::new();
        let mut record = WorkflowRecord::new(context("acme"), vec![]);
        record.context.query = "Approve my refund".into();
        let id = log.record(record).await.unwrap();

        assert!(!log.verify_integrity(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_for_tenant() {
        let log = AuditLog::new();
        let first = log.record(WorkflowRecord::new(context("acme"), vec![])).await.unwrap();
        log.record(WorkflowRecord::new(context("globex"), vec![])).await.unwrap();

        assert_eq!(log.list_for_tenant("acme").await.unwrap(), vec![first]);
        assert_eq!(log.len().await, 2);
    }
}
