//! Governed entities, acting principals, and gate evidence
//!
//! The engine never owns the entities it governs. It holds a polymorphic
//! `(EntityType, EntityId)` reference and consumes read-only evidence —
//! an entity field snapshot plus approval records — supplied by the
//! external entity and approval services.

use crate::{EntityId, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of entity kinds a workflow can govern
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Case,
    Investigation,
    Disclosure,
    Policy,
    Campaign,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Case => "CASE",
            Self::Investigation => "INVESTIGATION",
            Self::Disclosure => "DISCLOSURE",
            Self::Policy => "POLICY",
            Self::Campaign => "CAMPAIGN",
        };
        write!(f, "{}", s)
    }
}

/// The acting identity behind an operation
///
/// Roles come from the external identity subsystem; the engine trusts
/// them and only checks membership against a transition's allowed roles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier of the actor
    pub id: String,
    /// Role names granted to the actor
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// The well-known system principal, for operations that need an
    /// actor but have no authenticated user behind them.
    pub fn system() -> Self {
        Self {
            id: "system".into(),
            roles: vec!["SYSTEM".into()],
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A read-only snapshot of the governed entity's fields
///
/// Field paths are dot-separated (`"review.approver"` walks nested
/// objects). A field counts as present only if it resolves to a
/// non-empty value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntitySnapshot {
    fields: HashMap<String, serde_json::Value>,
}

impl EntitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, path: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(path.into(), value);
        self
    }

    /// Resolve a dot-separated field path
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        if let Some(value) = self.fields.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Check that a field is present and non-empty
    pub fn has_value(&self, path: &str) -> bool {
        match self.field(path) {
            None => false,
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }
}

/// An approval recorded against a stage of an instance
///
/// Produced by the external approval subsystem; the gate evaluator only
/// checks for existence of a matching record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// The stage the approval was recorded for
    pub stage: StageId,
    /// The role the approver acted under
    pub approver_role: String,
    /// Who approved
    pub approved_by: String,
    /// When the approval was recorded
    pub approved_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn new(
        stage: StageId,
        approver_role: impl Into<String>,
        approved_by: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            approver_role: approver_role.into(),
            approved_by: approved_by.into(),
            approved_at: Utc::now(),
        }
    }
}

/// A polymorphic reference to the governed entity
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}
