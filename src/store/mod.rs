//! Account store: users, policies and incidents
//!
//! Read by the lookup tools and written when a decision asks for a
//! database entry. Postgres in deployment, in-memory otherwise. The
//! Postgres backend expects the `users`, `policies` and `incidents`
//! tables to exist.

use crate::error::OrchestrationError;
use crate::models::{IntentResult, QueryContext, Report, Validity, VerificationDecision};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub name: String,
    pub customer_id: Option<String>,
    pub age: Option<i32>,
    pub email: String,
    pub date_registered: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRecord {
    pub policy_number: String,
    pub user_id: String,
    pub policy_name: String,
    pub item_insured: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub billing_duration: Option<String>,
    pub last_payment_date: Option<String>,
    pub last_payment_amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::InProgress => "in_progress",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "in_progress" => IncidentStatus::InProgress,
            "resolved" => IncidentStatus::Resolved,
            "closed" => IncidentStatus::Closed,
            _ => IncidentStatus::Open,
        }
    }
}

/// Incident to be recorded for a verified claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewIncident {
    pub user_id: Option<String>,
    pub tenant_id: String,
    pub intent: Option<String>,
    pub summary: String,
    pub issue: String,
    pub user_demand: String,
    pub is_valid: Validity,
    pub resolution: String,
    pub confidence: f64,
    pub policy_refs: Vec<String>,
    pub decision: Value,
}

impl NewIncident {
    pub fn from_decision(
        ctx: &QueryContext,
        intent: Option<&IntentResult>,
        report: Option<&Report>,
        decision: &VerificationDecision,
    ) -> Self {
        let summary: String = ctx.query.chars().take(200).collect();
        Self {
            user_id: ctx.user_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            intent: intent.map(|i| i.intent.as_str().to_string()),
            summary,
            issue: report.map(|r| r.issue.clone()).unwrap_or_default(),
            user_demand: report.map(|r| r.user_demand.clone()).unwrap_or_default(),
            is_valid: decision.is_valid,
            resolution: decision.resolution.clone(),
            confidence: decision.confidence,
            policy_refs: decision.policy_citations.clone(),
            decision: serde_json::to_value(decision).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentRecord {
    pub incident_id: Uuid,
    #[serde(flatten)]
    pub details: NewIncident,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;
    async fn list_policies(&self, user_id: &str) -> Result<Vec<PolicyRecord>>;
    async fn create_incident(&self, incident: NewIncident) -> Result<IncidentRecord>;
    async fn get_incident(&self, incident_id: Uuid) -> Result<Option<IncidentRecord>>;
    /// Returns false when the incident does not exist
    async fn update_incident_status(
        &self,
        incident_id: Uuid,
        status: IncidentStatus,
        resolution: Option<String>,
    ) -> Result<bool>;
}

//
// ================= In-memory =================
//

#[derive(Default)]
pub struct InMemoryAccountStore {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
    policies: Arc<RwLock<Vec<PolicyRecord>>>,
    incidents: Arc<RwLock<HashMap<Uuid, IncidentRecord>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.user_id.clone(), user);
    }

    pub async fn insert_policy(&self, policy: PolicyRecord) {
        self.policies.write().await.push(policy);
    }

    pub async fn incident_count(&self) -> usize {
        self.incidents.read().await.len()
    }

    /// Store with one customer and one home insurance policy
    pub async fn with_demo_data() -> Self {
        let store = Self::new();
        store
            .insert_user(UserRecord {
                user_id: "U001".to_string(),
                name: "Asha Verma".to_string(),
                customer_id: Some("C-1001".to_string()),
                age: Some(34),
                email: "asha.verma@example.com".to_string(),
                date_registered: "2023-04-12".to_string(),
            })
            .await;
        store
            .insert_policy(PolicyRecord {
                policy_number: "POL-7781".to_string(),
                user_id: "U001".to_string(),
                policy_name: "Home Shield".to_string(),
                item_insured: Some("Apartment contents".to_string()),
                start_date: "2024-01-01".to_string(),
                end_date: "2025-12-31".to_string(),
                billing_duration: Some("monthly".to_string()),
                last_payment_date: Some("2025-05-01".to_string()),
                last_payment_amount: Some(42.5),
            })
            .await;
        store
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn list_policies(&self, user_id: &str) -> Result<Vec<PolicyRecord>> {
        let policies = self.policies.read().await;
        Ok(policies.iter().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn create_incident(&self, incident: NewIncident) -> Result<IncidentRecord> {
        let now = Utc::now();
        let record = IncidentRecord {
            incident_id: Uuid::new_v4(),
            details: incident,
            status: IncidentStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.incidents.write().await.insert(record.incident_id, record.clone());
        Ok(record)
    }

    async fn get_incident(&self, incident_id: Uuid) -> Result<Option<IncidentRecord>> {
        Ok(self.incidents.read().await.get(&incident_id).cloned())
    }

    async fn update_incident_status(
        &self,
        incident_id: Uuid,
        status: IncidentStatus,
        resolution: Option<String>,
    ) -> Result<bool> {
        let mut incidents = self.incidents.write().await;
        let Some(record) = incidents.get_mut(&incident_id) else {
            return Ok(false);
        };

        record.status = status;
        if let Some(resolution) = resolution {
            record.details.resolution = resolution;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }
}

//
// ================= Postgres =================
//

pub struct PgAccountStore {
    pool: PgPool,
}

fn db_error(context: &str, e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::DatabaseError(format!("{}: {}", context, e))
}

impl PgAccountStore {
    /// Lazily connecting pool; no connection is made until first use
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| db_error("Failed to configure postgres pool", e))?;
        info!("Account store backend: postgres");
        Ok(Self { pool })
    }

    fn user_from_row(row: &PgRow) -> UserRecord {
        UserRecord {
            user_id: row.try_get("user_id").unwrap_or_default(),
            name: row.try_get("name").unwrap_or_default(),
            customer_id: row.try_get::<Option<String>, _>("customer_id").ok().flatten(),
            age: row.try_get::<Option<i32>, _>("age").ok().flatten(),
            email: row.try_get("email").unwrap_or_default(),
            date_registered: row.try_get("date_registered").unwrap_or_default(),
        }
    }

    fn policy_from_row(row: &PgRow) -> PolicyRecord {
        PolicyRecord {
            policy_number: row.try_get("policy_number").unwrap_or_default(),
            user_id: row.try_get("user_id").unwrap_or_default(),
            policy_name: row.try_get("policy_name").unwrap_or_default(),
            item_insured: row.try_get::<Option<String>, _>("item_insured").ok().flatten(),
            start_date: row.try_get("start_date").unwrap_or_default(),
            end_date: row.try_get("end_date").unwrap_or_default(),
            billing_duration: row.try_get::<Option<String>, _>("billing_duration").ok().flatten(),
            last_payment_date: row.try_get::<Option<String>, _>("last_payment_date").ok().flatten(),
            last_payment_amount: row.try_get::<Option<f64>, _>("last_payment_amount").ok().flatten(),
        }
    }

    fn incident_from_row(row: &PgRow) -> IncidentRecord {
        let is_valid: String = row.try_get("is_valid").unwrap_or_default();
        let policy_refs: Value = row.try_get("policy_refs").unwrap_or(Value::Null);
        let status: String = row.try_get("status").unwrap_or_default();
        let now = Utc::now();

        IncidentRecord {
            incident_id: row.try_get("incident_id").unwrap_or_else(|_| Uuid::nil()),
            details: NewIncident {
                user_id: row.try_get::<Option<String>, _>("user_id").ok().flatten(),
                tenant_id: row.try_get("tenant_id").unwrap_or_default(),
                intent: row.try_get::<Option<String>, _>("intent").ok().flatten(),
                summary: row.try_get("summary").unwrap_or_default(),
                issue: row.try_get("issue").unwrap_or_default(),
                user_demand: row.try_get("user_demand").unwrap_or_default(),
                is_valid: crate::verification::repair_validity(&Value::String(is_valid)),
                resolution: row.try_get("resolution").unwrap_or_default(),
                confidence: row.try_get("confidence").unwrap_or(0.0),
                policy_refs: serde_json::from_value(policy_refs).unwrap_or_default(),
                decision: row.try_get("decision_json").unwrap_or(Value::Null),
            },
            status: IncidentStatus::from_db(&status),
            created_at: row.try_get("created_at").unwrap_or(now),
            updated_at: row.try_get("updated_at").unwrap_or(now),
        }
    }

    async fn find_user(&self, column: &str, value: &str) -> Result<Option<UserRecord>> {
        let sql = format!(
            "SELECT user_id, name, customer_id, age, email, date_registered FROM users WHERE {} = $1",
            column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load user", e))?;
        Ok(row.as_ref().map(Self::user_from_row))
    }
}

#[async_trait::async_trait]
impl AccountStore for PgAccountStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        self.find_user("user_id", user_id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.find_user("email", email).await
    }

    async fn list_policies(&self, user_id: &str) -> Result<Vec<PolicyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT policy_number, user_id, policy_name, item_insured, start_date, end_date,
                   billing_duration, last_payment_date, last_payment_amount
            FROM policies
            WHERE user_id = $1
            ORDER BY start_date ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list policies", e))?;

        Ok(rows.iter().map(Self::policy_from_row).collect())
    }

    async fn create_incident(&self, incident: NewIncident) -> Result<IncidentRecord> {
        let now = Utc::now();
        let record = IncidentRecord {
            incident_id: Uuid::new_v4(),
            details: incident,
            status: IncidentStatus::Open,
            created_at: now,
            updated_at: now,
        };
        let d = &record.details;

        sqlx::query(
            r#"
            INSERT INTO incidents
              (incident_id, user_id, tenant_id, intent, summary, issue, user_demand, is_valid,
               resolution, confidence, status, policy_refs, decision_json, created_at, updated_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record.incident_id)
        .bind(&d.user_id)
        .bind(&d.tenant_id)
        .bind(&d.intent)
        .bind(&d.summary)
        .bind(&d.issue)
        .bind(&d.user_demand)
        .bind(d.is_valid.as_str())
        .bind(&d.resolution)
        .bind(d.confidence)
        .bind(record.status.as_str())
        .bind(serde_json::to_value(&d.policy_refs)?)
        .bind(&d.decision)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert incident", e))?;

        Ok(record)
    }

    async fn get_incident(&self, incident_id: Uuid) -> Result<Option<IncidentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT incident_id, user_id, tenant_id, intent, summary, issue, user_demand, is_valid,
                   resolution, confidence, status, policy_refs, decision_json, created_at, updated_at
            FROM incidents
            WHERE incident_id = $1
            "#,
        )
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load incident", e))?;

        Ok(row.as_ref().map(Self::incident_from_row))
    }

    async fn update_incident_status(
        &self,
        incident_id: Uuid,
        status: IncidentStatus,
        resolution: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET status = $2, resolution = COALESCE($3, resolution), updated_at = $4
            WHERE incident_id = $1
            "#,
        )
        .bind(incident_id)
        .bind(status.as_str())
        .bind(resolution)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update incident", e))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Postgres when a database URL is configured and usable, in-memory otherwise
pub fn build_account_store(database_url: Option<&str>) -> Arc<dyn AccountStore> {
    if let Some(url) = database_url {
        match PgAccountStore::connect_lazy(url) {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!(error = %e, "Falling back to in-memory account store"),
        }
    }
    info!("Account store backend: in-memory");
    Arc::new(InMemoryAccountStore::new())
}
