//! Gate evaluator: checks whether transition gates are satisfied
//!
//! The gate evaluator examines the supplied evidence — an entity field
//! snapshot, approval records, and the stage clock — to decide whether
//! a set of gates passes. It does NOT produce side effects; it's a pure
//! evaluation function. Every gate is evaluated so the caller gets the
//! complete list of failures, not just the first.

use caseflow_types::{
    ApprovalRecord, ConditionOp, EntitySnapshot, Gate, GateFailure, GateKind, StageId,
};
use chrono::{DateTime, Utc};

/// Evaluates gates against collected evidence
#[derive(Clone, Debug, Default)]
pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a set of gates, collecting every failure.
    pub fn evaluate<'a, I>(&self, gates: I, context: &EvaluationContext) -> GateOutcome
    where
        I: IntoIterator<Item = &'a Gate>,
    {
        let mut failures = Vec::new();
        for gate in gates {
            if let Some(reason) = self.evaluate_gate(gate, context) {
                let message = gate.error_message.clone().unwrap_or(reason);
                failures.push(GateFailure::new(gate.kind_name(), message));
            }
        }
        GateOutcome {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// Evaluate one gate. Returns `None` on pass, or the generated
    /// failure reason.
    fn evaluate_gate(&self, gate: &Gate, context: &EvaluationContext) -> Option<String> {
        match &gate.kind {
            GateKind::RequiredFields { fields } => {
                let missing: Vec<&str> = fields
                    .iter()
                    .filter(|f| !context.entity.has_value(f))
                    .map(|f| f.as_str())
                    .collect();
                if missing.is_empty() {
                    None
                } else {
                    Some(format!(
                        "Required field(s) missing or empty: {}",
                        missing.join(", ")
                    ))
                }
            }

            GateKind::Approval { approver_role } => {
                let approved = context
                    .approvals
                    .iter()
                    .any(|a| a.stage == context.stage && &a.approver_role == approver_role);
                if approved {
                    None
                } else {
                    Some(format!(
                        "No approval by role '{}' recorded for stage '{}'",
                        approver_role, context.stage
                    ))
                }
            }

            GateKind::Time { min_days } => {
                let elapsed = context
                    .now
                    .signed_duration_since(context.stage_entered_at)
                    .num_days();
                if elapsed >= *min_days as i64 {
                    None
                } else {
                    Some(format!(
                        "Minimum dwell time not reached: {} of {} day(s) in stage '{}'",
                        elapsed, min_days, context.stage
                    ))
                }
            }

            GateKind::Condition { field, op, value } => {
                let Some(actual) = context.entity.field(field) else {
                    return Some(format!("Field '{}' not found on entity", field));
                };
                if compare(*op, actual, value) {
                    None
                } else {
                    Some(format!(
                        "Condition not met: {} {:?} {}",
                        field, op, value
                    ))
                }
            }

            // Unrecognized gate payloads fail closed
            GateKind::Unknown => Some("Unrecognized gate type".into()),
        }
    }
}

/// Compare an entity field against an expected value
fn compare(op: ConditionOp, actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    use serde_json::Value;
    match op {
        ConditionOp::Eq => actual == expected,
        ConditionOp::Ne => actual != expected,
        ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte => {
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(e)) => match op {
                    ConditionOp::Gt => a > e,
                    ConditionOp::Gte => a >= e,
                    ConditionOp::Lt => a < e,
                    ConditionOp::Lte => a <= e,
                    _ => unreachable!(),
                },
                // Non-numeric operands compare lexicographically
                _ => match (actual.as_str(), expected.as_str()) {
                    (Some(a), Some(e)) => match op {
                        ConditionOp::Gt => a > e,
                        ConditionOp::Gte => a >= e,
                        ConditionOp::Lt => a < e,
                        ConditionOp::Lte => a <= e,
                        _ => unreachable!(),
                    },
                    _ => false,
                },
            }
        }
        ConditionOp::Contains => match actual {
            Value::Array(items) => items.contains(expected),
            Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
            _ => false,
        },
    }
}

/// Result of evaluating a set of gates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateOutcome {
    /// True iff every gate passed
    pub passed: bool,
    /// One entry per failed gate
    pub failures: Vec<GateFailure>,
}

/// Evidence a gate evaluation runs against
///
/// The entity snapshot and approval records come from external
/// services; the stage and clock fields are filled in by the lifecycle
/// manager from the instance under evaluation.
#[derive(Clone, Debug)]
pub struct EvaluationContext {
    /// Read-only snapshot of the governed entity's fields
    pub entity: EntitySnapshot,
    /// Approvals recorded against the instance
    pub approvals: Vec<ApprovalRecord>,
    /// The instance's current stage
    pub stage: StageId,
    /// When the instance entered that stage
    pub stage_entered_at: DateTime<Utc>,
    /// Evaluation clock
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn new(stage: StageId, stage_entered_at: DateTime<Utc>) -> Self {
        Self {
            entity: EntitySnapshot::new(),
            approvals: Vec::new(),
            stage,
            stage_entered_at,
            now: Utc::now(),
        }
    }

    pub fn with_entity(mut self, entity: EntitySnapshot) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_approval(mut self, approval: ApprovalRecord) -> Self {
        self.approvals.push(approval);
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
