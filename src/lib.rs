//! BFSI Claim Orchestrator
//!
//! A multi-agent customer-support workflow for banking, financial
//! services and insurance:
//! - Classifies intent, urgency and sentiment and decomposes the query
//!   into search aspects
//! - Retrieves tenant- and role-scoped knowledge, re-ranked by a hybrid
//!   scoring engine
//! - Answers plain queries; turns complaints and service requests into a
//!   structured report that a verifier checks, calling tools as needed
//! - Repairs every decision into a conforming action plan
//! - Records incidents and a per-run audit trail
//!
//! FLOW:
//! INTENT → (OUT_OF_SCOPE | ANSWER | REPORT → VERIFY ⇄ TOOLS) → END

pub mod agents;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod llm;
pub mod messages;
pub mod models;
pub mod retrieval;
pub mod scoring;
pub mod state;
pub mod store;
pub mod tools;
pub mod verification;

#[cfg(test)]
pub mod testing;

pub use error::Result;

pub use graph::{Orchestrator, WorkflowOutcome};
pub use models::*;
