//! Decision validation
//!
//! The verifier model produces a loosely typed decision. The validator
//! turns it into a `VerificationDecision` that always satisfies the
//! action-plan invariants, applying deterministic repair rules in order.

use crate::config::DecisionConfig;
use crate::models::{ActionPlan, IntentResult, TicketType, Validity, VerificationDecision};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

pub const FALLBACK_RESOLUTION: &str =
    "Unable to verify claim due to processing error. A ticket has been created for manual review.";

const EMPTY_RESOLUTION: &str =
    "Your request has been recorded and will be reviewed by our support team.";

//
// ================= Raw extraction =================
//

/// Decision as extracted by the model. Every field is optional and
/// `is_valid` may arrive as a string or a boolean.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDecision {
    pub is_valid: Value,
    pub resolution: String,
    pub confidence: Option<f64>,
    pub policy_citations: Vec<String>,
    pub action_plan: RawActionPlan,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawActionPlan {
    pub create_ticket: bool,
    pub ticket_type: Option<String>,
    pub make_db_entry: bool,
    pub call_refund_api: bool,
    pub refund_amount: Option<f64>,
    pub idempotency_key: Option<String>,
}

/// Map a loosely typed verdict onto one of the three literals
pub fn repair_validity(raw: &Value) -> Validity {
    match raw {
        Value::Bool(true) => Validity::Yes,
        Value::Bool(false) => Validity::No,
        Value::String(s) => match s.trim() {
            "Yes" => Validity::Yes,
            "No" => Validity::No,
            "Low Confidence" => Validity::LowConfidence,
            other => match other.to_lowercase().as_str() {
                "true" | "yes" | "valid" => Validity::Yes,
                "false" | "no" | "invalid" => Validity::No,
                _ => Validity::LowConfidence,
            },
        },
        _ => Validity::LowConfidence,
    }
}

fn clamp_confidence(raw: Option<f64>) -> f64 {
    match raw {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

//
// ================= Repair rules =================
//

pub struct RuleContext<'a> {
    pub intent: Option<&'a IntentResult>,
    pub min_confidence: f64,
    pub max_refund_amount: f64,
}

/// A deterministic fix-up applied to a decision
pub trait RepairRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the rule, returning a note when something was changed
    fn apply(&self, decision: &mut VerificationDecision, ctx: &RuleContext<'_>) -> Option<String>;
}

/// Refund requests must carry a positive amount within the auto-approval limit
pub struct RefundLimitRule;

impl RepairRule for RefundLimitRule {
    fn name(&self) -> &'static str {
        "refund_limit"
    }

    fn apply(&self, decision: &mut VerificationDecision, ctx: &RuleContext<'_>) -> Option<String> {
        let plan = &mut decision.action_plan;
        let mut notes = Vec::new();

        if let Some(amount) = plan.refund_amount {
            if !amount.is_finite() || amount <= 0.0 {
                plan.refund_amount = None;
                notes.push(format!("dropped refund amount {}", amount));
            }
        }

        if plan.call_refund_api {
            match plan.refund_amount {
                None => {
                    plan.call_refund_api = false;
                    plan.create_ticket = true;
                    notes.push("refund requested without an amount".to_string());
                }
                Some(amount) if amount > ctx.max_refund_amount => {
                    plan.call_refund_api = false;
                    plan.create_ticket = true;
                    notes.push(format!(
                        "refund {} exceeds auto-approval limit {}",
                        amount, ctx.max_refund_amount
                    ));
                }
                Some(_) => {}
            }
        }

        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

/// Below the confidence floor a human must look at the case
pub struct LowConfidenceRule;

impl RepairRule for LowConfidenceRule {
    fn name(&self) -> &'static str {
        "low_confidence_escalation"
    }

    fn apply(&self, decision: &mut VerificationDecision, ctx: &RuleContext<'_>) -> Option<String> {
        if decision.confidence >= ctx.min_confidence {
            return None;
        }

        let forced_ticket = !decision.action_plan.create_ticket;
        decision.action_plan.create_ticket = true;

        let downgraded = decision.is_valid != Validity::LowConfidence;
        decision.is_valid = Validity::LowConfidence;

        (forced_ticket || downgraded).then(|| {
            format!(
                "confidence {:.2} below {:.2}, ticket forced",
                decision.confidence, ctx.min_confidence
            )
        })
    }
}

/// A ticket needs a valid category
pub struct TicketTypeRule;

impl RepairRule for TicketTypeRule {
    fn name(&self) -> &'static str {
        "ticket_type"
    }

    fn apply(&self, decision: &mut VerificationDecision, ctx: &RuleContext<'_>) -> Option<String> {
        let plan = &mut decision.action_plan;
        if !plan.create_ticket || plan.ticket_type.is_some() {
            return None;
        }

        let repaired = ticket_type_for(ctx.intent);
        plan.ticket_type = Some(repaired);
        Some(format!("ticket_type set to {}", repaired))
    }
}

pub struct IdempotencyKeyRule;

impl RepairRule for IdempotencyKeyRule {
    fn name(&self) -> &'static str {
        "idempotency_key"
    }

    fn apply(&self, decision: &mut VerificationDecision, _ctx: &RuleContext<'_>) -> Option<String> {
        if !decision.action_plan.idempotency_key.trim().is_empty() {
            return None;
        }
        decision.action_plan.idempotency_key = Uuid::new_v4().to_string();
        Some("generated idempotency key".to_string())
    }
}

pub struct ResolutionTextRule;

impl RepairRule for ResolutionTextRule {
    fn name(&self) -> &'static str {
        "resolution_text"
    }

    fn apply(&self, decision: &mut VerificationDecision, _ctx: &RuleContext<'_>) -> Option<String> {
        if !decision.resolution.trim().is_empty() {
            return None;
        }
        decision.resolution = EMPTY_RESOLUTION.to_string();
        Some("empty resolution replaced".to_string())
    }
}

/// Ticket category derived from the classified intent
fn ticket_type_for(intent: Option<&IntentResult>) -> TicketType {
    intent
        .and_then(|i| i.intent.ticket_type())
        .unwrap_or(TicketType::ServiceRequest)
}

//
// ================= Validator =================
//

pub struct DecisionValidator {
    min_confidence: f64,
    max_refund_amount: f64,
    rules: Vec<Box<dyn RepairRule>>,
}

impl DecisionValidator {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            max_refund_amount: config.max_refund_amount,
            rules: vec![
                Box::new(RefundLimitRule),
                Box::new(LowConfidenceRule),
                Box::new(TicketTypeRule),
                Box::new(IdempotencyKeyRule),
                Box::new(ResolutionTextRule),
            ],
        }
    }

    /// Repair a raw extraction into a conforming decision
    pub fn validate(&self, raw: RawDecision, intent: Option<&IntentResult>) -> VerificationDecision {
        let is_valid = repair_validity(&raw.is_valid);
        if raw.is_valid.as_str() != Some(is_valid.as_str()) {
            warn!(raw = %raw.is_valid, repaired = %is_valid, "Repaired is_valid");
        }

        let ticket_type = raw
            .action_plan
            .ticket_type
            .as_deref()
            .and_then(TicketType::from_literal);
        if ticket_type.is_none() {
            if let Some(bad) = raw.action_plan.ticket_type.as_deref() {
                warn!(ticket_type = %bad, "Discarded unknown ticket_type");
            }
        }

        let mut decision = VerificationDecision {
            is_valid,
            resolution: raw.resolution,
            confidence: clamp_confidence(raw.confidence),
            policy_citations: raw.policy_citations,
            action_plan: ActionPlan {
                create_ticket: raw.action_plan.create_ticket,
                ticket_type,
                make_db_entry: raw.action_plan.make_db_entry,
                call_refund_api: raw.action_plan.call_refund_api,
                refund_amount: raw.action_plan.refund_amount,
                idempotency_key: raw.action_plan.idempotency_key.unwrap_or_default(),
            },
        };

        let ctx = RuleContext {
            intent,
            min_confidence: self.min_confidence,
            max_refund_amount: self.max_refund_amount,
        };

        for rule in &self.rules {
            if let Some(note) = rule.apply(&mut decision, &ctx) {
                info!(rule = rule.name(), note = %note, "Decision repaired");
            }
        }

        info!(
            is_valid = %decision.is_valid,
            confidence = decision.confidence,
            create_ticket = decision.action_plan.create_ticket,
            "Decision validated"
        );
        decision
    }

    /// Conservative decision used when no usable extraction exists
    pub fn fallback(&self, intent: Option<&IntentResult>) -> VerificationDecision {
        warn!("Using fallback decision");
        VerificationDecision {
            is_valid: Validity::LowConfidence,
            resolution: FALLBACK_RESOLUTION.to_string(),
            confidence: 0.3,
            policy_citations: Vec::new(),
            action_plan: ActionPlan {
                create_ticket: true,
                ticket_type: Some(ticket_type_for(intent)),
                make_db_entry: true,
                call_refund_api: false,
                refund_amount: None,
                idempotency_key: Uuid::new_v4().to_string(),
            },
        }
    }
}

impl Default for DecisionValidator {
    fn default() -> Self {
        Self::new(&DecisionConfig::default())
    }
}

//
// ================= Tests =================
//
