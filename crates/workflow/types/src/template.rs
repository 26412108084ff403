//! Workflow templates: versioned stage/transition graphs
//!
//! A template version is one row. Publishing freezes its shape; edits
//! made while active instances reference it fork a new row with a
//! bumped version number. The structural invariants (unique stage ids,
//! referential integrity of the initial stage and every transition
//! endpoint) are enforced by `validate()` before anything persists.

use crate::{EntityType, Gate, OrgId, StageId, TemplateId, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Stage ────────────────────────────────────────────────────────────

/// One stage in a workflow template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stage {
    /// Stage identifier, unique within the template
    pub id: StageId,
    /// Human-readable name
    pub name: String,
    /// SLA budget for this stage, in days
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_days: Option<u32>,
    /// Gates that must pass before an instance may enter this stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_gates: Vec<Gate>,
    /// Whether this stage marks the end of the pipeline
    #[serde(default)]
    pub terminal: bool,
    /// Display color hint for the UI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Display ordering
    #[serde(default)]
    pub order: u32,
}

impl Stage {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: StageId::new(id),
            name: name.into(),
            sla_days: None,
            entry_gates: Vec::new(),
            terminal: false,
            color: None,
            order: 0,
        }
    }

    pub fn with_sla_days(mut self, days: u32) -> Self {
        self.sla_days = Some(days);
        self
    }

    pub fn with_entry_gate(mut self, gate: Gate) -> Self {
        self.entry_gates.push(gate);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

// ── Transition ───────────────────────────────────────────────────────

/// A directed edge between two stages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Source stage
    pub from: StageId,
    /// Target stage
    pub to: StageId,
    /// Gates evaluated on this edge, in addition to the target stage's
    /// entry gates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<Gate>,
    /// Roles permitted to take this edge; empty means unrestricted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_roles: Vec<String>,
    /// Whether a non-empty reason string must accompany the move
    #[serde(default)]
    pub requires_reason: bool,
    /// Display label for the UI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: StageId::new(from),
            to: StageId::new(to),
            gates: Vec::new(),
            allowed_roles: Vec::new(),
            requires_reason: false,
            label: None,
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn with_allowed_role(mut self, role: impl Into<String>) -> Self {
        self.allowed_roles.push(role.into());
        self
    }

    pub fn requires_reason(mut self) -> Self {
        self.requires_reason = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Check whether a principal's role set may take this edge
    pub fn permits_roles(&self, roles: &[String]) -> bool {
        self.allowed_roles.is_empty() || roles.iter().any(|r| self.allowed_roles.contains(r))
    }
}

// ── Template ─────────────────────────────────────────────────────────

/// The caller-supplied shape of a new template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub name: String,
    pub entity_type: EntityType,
    pub stages: Vec<Stage>,
    pub transitions: Vec<Transition>,
    pub initial_stage: StageId,
    #[serde(default)]
    pub is_default: bool,
}

impl TemplateDefinition {
    pub fn new(
        name: impl Into<String>,
        entity_type: EntityType,
        initial_stage: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type,
            stages: Vec::new(),
            transitions: Vec::new(),
            initial_stage: StageId::new(initial_stage),
            is_default: false,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// A partial edit to a template, applied by the versioning coordinator
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TemplatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<Stage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<Transition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_stage: Option<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

impl TemplatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = Some(stages);
        self
    }

    pub fn with_transitions(mut self, transitions: Vec<Transition>) -> Self {
        self.transitions = Some(transitions);
        self
    }

    pub fn with_initial_stage(mut self, stage: impl Into<String>) -> Self {
        self.initial_stage = Some(StageId::new(stage));
        self
    }

    pub fn with_is_default(mut self, is_default: bool) -> Self {
        self.is_default = Some(is_default);
        self
    }
}

/// One version of a workflow template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Identifier of this version row
    pub id: TemplateId,
    /// Owning organization
    pub org_id: OrgId,
    /// Display name; versions of the same workflow share it
    pub name: String,
    /// Kind of entity this workflow governs
    pub entity_type: EntityType,
    /// Version number, bumped only on fork
    pub version: u32,
    /// Whether this version accepts new instances
    pub is_active: bool,
    /// Whether this is the default template for its entity type
    pub is_default: bool,
    /// Stages of the graph
    pub stages: Vec<Stage>,
    /// Directed edges of the graph
    pub transitions: Vec<Transition>,
    /// Stage new instances start in
    pub initial_stage: StageId,
    /// Set when created by cloning; informational only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<TemplateId>,
    /// Optimistic-concurrency counter for edits to this row
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    /// Build a version-1 template from a definition. Does not validate;
    /// the store validates before persisting.
    pub fn from_definition(org_id: OrgId, definition: TemplateDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: TemplateId::generate(),
            org_id,
            name: definition.name,
            entity_type: definition.entity_type,
            version: 1,
            is_active: false,
            is_default: definition.is_default,
            stages: definition.stages,
            transitions: definition.transitions,
            initial_stage: definition.initial_stage,
            source_template_id: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate structural invariants
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.stages.is_empty() {
            return Err(WorkflowError::Validation(
                "Template must have at least one stage".into(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(&stage.id) {
                return Err(WorkflowError::Validation(format!(
                    "Duplicate stage id: '{}'",
                    stage.id
                )));
            }
        }

        if !seen.contains(&self.initial_stage) {
            return Err(WorkflowError::Validation(format!(
                "Initial stage '{}' is not a stage of this template",
                self.initial_stage
            )));
        }

        for transition in &self.transitions {
            if !seen.contains(&transition.from) {
                return Err(WorkflowError::Validation(format!(
                    "Transition references non-existent source stage: '{}'",
                    transition.from
                )));
            }
            if !seen.contains(&transition.to) {
                return Err(WorkflowError::Validation(format!(
                    "Transition references non-existent target stage: '{}'",
                    transition.to
                )));
            }
        }

        Ok(())
    }

    /// Look up a stage by id
    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.id == id)
    }

    /// All edges leaving a stage
    pub fn outgoing(&self, from: &StageId) -> Vec<&Transition> {
        self.transitions.iter().filter(|t| &t.from == from).collect()
    }

    /// Find the edge between two stages, if declared
    pub fn find_edge(&self, from: &StageId, to: &StageId) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| &t.from == from && &t.to == to)
    }

    /// Apply a patch, producing the edited shape. Used for both in-place
    /// mutation and fork copies; the caller re-validates the result.
    pub fn apply_patch(&self, patch: &TemplatePatch) -> Self {
        let mut edited = self.clone();
        if let Some(name) = &patch.name {
            edited.name = name.clone();
        }
        if let Some(stages) = &patch.stages {
            edited.stages = stages.clone();
        }
        if let Some(transitions) = &patch.transitions {
            edited.transitions = transitions.clone();
        }
        if let Some(initial) = &patch.initial_stage {
            edited.initial_stage = initial.clone();
        }
        if let Some(is_default) = patch.is_default {
            edited.is_default = is_default;
        }
        edited.updated_at = Utc::now();
        edited
    }
}
