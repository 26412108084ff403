//! Transition gates: policy checks a stage change must satisfy
//!
//! Gates are a closed sum type. Each variant carries its own typed
//! configuration, so there is no opaque config blob to mis-parse at
//! evaluation time. A payload whose tag is not recognized deserializes
//! to `Unknown`, which always fails evaluation — gates fail closed.

use serde::{Deserialize, Serialize};

/// A single gate on a transition or a stage entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gate {
    #[serde(flatten)]
    pub kind: GateKind,
    /// Operator-facing message returned verbatim when the gate fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Gate {
    pub fn required_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: GateKind::RequiredFields {
                fields: fields.into_iter().map(Into::into).collect(),
            },
            error_message: None,
        }
    }

    pub fn approval(approver_role: impl Into<String>) -> Self {
        Self {
            kind: GateKind::Approval {
                approver_role: approver_role.into(),
            },
            error_message: None,
        }
    }

    pub fn time(min_days: u32) -> Self {
        Self {
            kind: GateKind::Time { min_days },
            error_message: None,
        }
    }

    pub fn condition(
        field: impl Into<String>,
        op: ConditionOp,
        value: serde_json::Value,
    ) -> Self {
        Self {
            kind: GateKind::Condition {
                field: field.into(),
                op,
                value,
            },
            error_message: None,
        }
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Wire name of the gate kind
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            GateKind::RequiredFields { .. } => "required_fields",
            GateKind::Approval { .. } => "approval",
            GateKind::Time { .. } => "time",
            GateKind::Condition { .. } => "condition",
            GateKind::Unknown => "unknown",
        }
    }
}

/// The closed set of gate behaviors
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateKind {
    /// Every listed field path must be present and non-empty on the
    /// entity snapshot
    RequiredFields { fields: Vec<String> },
    /// An approval record must exist for the current stage matching
    /// this role
    Approval { approver_role: String },
    /// The instance must have spent at least `min_days` in the current
    /// stage
    Time { min_days: u32 },
    /// A declarative field comparison against entity state
    Condition {
        field: String,
        op: ConditionOp,
        value: serde_json::Value,
    },
    /// Catch-all for unrecognized gate payloads; always fails
    #[serde(other)]
    Unknown,
}

/// Comparators available to `Condition` gates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// One failed gate, with the message to surface to the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFailure {
    /// Wire name of the failing gate kind
    pub gate: String,
    /// The gate's `error_message` verbatim when set, otherwise a
    /// generated reason
    pub message: String,
}

impl GateFailure {
    pub fn new(gate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.gate, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gate_serde_shape() {
        let gate = Gate::required_fields(["approver", "severity"])
            .with_error_message("Approver and severity are required");
        let json = serde_json::to_value(&gate).unwrap();
        assert_eq!(json["type"], "required_fields");
        assert_eq!(json["fields"][0], "approver");
        assert_eq!(json["error_message"], "Approver and severity are required");
    }

    #[test]
    fn test_condition_gate_serde() {
        let gate = Gate::condition("risk_score", ConditionOp::Gte, json!(70));
        let json = serde_json::to_value(&gate).unwrap();
        assert_eq!(json["type"], "condition");
        assert_eq!(json["op"], "gte");

        let back: Gate = serde_json::from_value(json).unwrap();
        assert!(matches!(
            back.kind,
            GateKind::Condition {
                op: ConditionOp::Gte,
                ..
            }
        ));
    }

    #[test]
    fn test_unrecognized_type_deserializes_to_unknown() {
        let gate: Gate =
            serde_json::from_value(json!({"type": "webhook", "url": "https://x"})).unwrap();
        assert!(matches!(gate.kind, GateKind::Unknown));
        assert_eq!(gate.kind_name(), "unknown");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Gate::approval("COMPLIANCE_OFFICER").kind_name(), "approval");
        assert_eq!(Gate::time(3).kind_name(), "time");
        assert_eq!(
            Gate::condition("status", ConditionOp::Eq, json!("open")).kind_name(),
            "condition"
        );
    }

    #[test]
    fn test_gate_failure_display() {
        let failure = GateFailure::new("approval", "Compliance sign-off missing");
        assert_eq!(
            format!("{}", failure),
            "approval: Compliance sign-off missing"
        );
    }
}
